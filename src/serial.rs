use std::{io, time::Duration};

use tracing::debug;

use crate::device::Device;

/// Serial port related errors.
pub mod error;

/// Codecs for encoding/decoding messages to/from wire.
pub(crate) mod codecs;

/// The shared, mutually exclusive handle to an open port.
pub mod connection;

/// Reads one line at a time from a connection.
pub mod line_source;

pub use connection::Connection;
pub use line_source::{LineSource, ReadOutcome};

use error::SerialPortError;

/// Something bytes can be read from and written to, like a serial port.
///
/// Reads are expected to give up with [`io::ErrorKind::TimedOut`] once
/// the timeout given to [`Opener::open`] has passed without data.
/// A read of zero bytes means the port is gone.
pub trait Port: io::Read + io::Write + Send {
    /// Another handle to the same port.
    /// One handle may block in a read while the other writes.
    fn try_clone_port(&self) -> io::Result<Box<dyn Port>>;
}

impl Port for Box<dyn serialport::SerialPort> {
    fn try_clone_port(&self) -> io::Result<Box<dyn Port>> {
        Ok(Box::new(self.try_clone()?))
    }
}

/// Opens the [`Port`] belonging to a [`Device`].
pub trait Opener: Send + Sync {
    /// Open the device.
    /// Reads on the returned port block for at most `read_timeout`.
    fn open(&self, device: &Device, read_timeout: Duration)
        -> Result<Box<dyn Port>, SerialPortError>;
}

/// Opens real serial ports.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialOpener;

impl Opener for SerialOpener {
    fn open(
        &self,
        device: &Device,
        read_timeout: Duration,
    ) -> Result<Box<dyn Port>, SerialPortError> {
        debug!(%device, "Opening port");

        let port = serialport::new(&device.path, device.baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(read_timeout)
            .open()
            .map_err(|e| SerialPortError::Open {
                path: device.path.clone(),
                problem: e.to_string(),
            })?;

        Ok(Box::new(port))
    }
}

/// Turn raw line bytes into text.
///
/// Bad utf8 is replaced, and the `\r` of a `\r\n` line ending is dropped.
/// Other control bytes are kept as they are.
pub fn decode_line<B: AsRef<[u8]>>(bytes: B) -> String {
    let text = String::from_utf8_lossy(bytes.as_ref());

    text.trim_end_matches(|c| c == '\r' || c == '\n').to_owned()
}
