use std::{
    io::{self, Read, Write},
    sync::{Mutex, MutexGuard, PoisonError},
};

use bytes::BytesMut;
use tokio_util::codec::Encoder;
use tracing::trace;

use super::{codecs::lines::LinesCodec, error::SerialPortError, Port};
use crate::device::Device;

/// An open port, bound to its [`Device`].
///
/// The reader of the device and any number of command writers share this.
/// Reads and writes go through separate handles to the port, so a command
/// never waits on a read in flight. Writes are serialized among themselves.
pub struct Connection {
    device: Device,
    reader: Mutex<Box<dyn Port>>,
    writer: Mutex<Box<dyn Port>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

// The ports hold no invariants a panicking holder could break.
fn lock(port: &Mutex<Box<dyn Port>>) -> MutexGuard<'_, Box<dyn Port>> {
    port.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Connection {
    /// Wrap an opened port.
    ///
    /// Fails if the port can't hand out a second handle for writing.
    pub fn new(device: Device, port: Box<dyn Port>) -> Result<Self, SerialPortError> {
        let writer = port.try_clone_port()?;

        Ok(Self {
            device,
            reader: Mutex::new(port),
            writer: Mutex::new(writer),
        })
    }

    /// A single read, blocking for at most the read timeout the port was opened with.
    pub(crate) fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        lock(&self.reader).read(buf)
    }

    /// Put `command` on the wire followed by `\r\n`, and flush.
    ///
    /// Blocks until the bytes are handed to the device.
    pub fn write_line(&self, command: &str) -> Result<(), SerialPortError> {
        let mut bytes = BytesMut::with_capacity(command.len() + 2);
        LinesCodec::default().encode(command.as_bytes(), &mut bytes)?;

        let mut port = lock(&self.writer);
        port.write_all(&bytes)?;
        port.flush()?;

        trace!(device = %self.device.name, "Wrote {} byte(s)", bytes.len());

        Ok(())
    }
}
