//! Mocked serial devices, useful to test the hub without actual serial ports.
//!
//! A [`MockDevice`] is fed the bytes the "device" prints,
//! and records whatever was written to it.

use std::{
    collections::{HashMap, VecDeque},
    io,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tracing::info;

use crate::{
    device::Device,
    serial::{error::SerialPortError, Opener, Port},
};

#[derive(Debug, Default)]
struct State {
    // Bytes printed by the device, not yet read.
    to_host: VecDeque<u8>,

    // Bytes written to the device.
    from_host: Vec<u8>,

    disconnected: bool,

    // Reads hit end of file.
    closed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    readable: Condvar,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The outside of a mocked device.
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    shared: Arc<Shared>,
}

impl MockDevice {
    /// Make the device print these bytes.
    pub fn feed<B: AsRef<[u8]>>(&self, bytes: B) {
        self.shared.state().to_host.extend(bytes.as_ref());
        self.shared.readable.notify_all();
    }

    /// Everything written to the device so far.
    pub fn written(&self) -> Vec<u8> {
        self.shared.state().from_host.clone()
    }

    /// Unplug the device. Any further read or write fails.
    pub fn disconnect(&self) {
        self.shared.state().disconnected = true;
        self.shared.readable.notify_all();
    }

    /// Make reads hit end of file once the printed bytes are read,
    /// like a port whose other end hung up.
    pub fn close(&self) {
        self.shared.state().closed = true;
        self.shared.readable.notify_all();
    }
}

struct MockPort {
    shared: Arc<Shared>,
    timeout: Duration,
}

fn unplugged() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "mock device disconnected")
}

impl io::Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let state = self.shared.state();

        let (mut state, _) = self
            .shared
            .readable
            .wait_timeout_while(state, self.timeout, |state| {
                state.to_host.is_empty() && !state.disconnected && !state.closed
            })
            .unwrap_or_else(PoisonError::into_inner);

        if state.disconnected {
            return Err(unplugged());
        }

        if state.to_host.is_empty() && state.closed {
            return Ok(0);
        }

        if state.to_host.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }

        let amount = buf.len().min(state.to_host.len());
        for (slot, byte) in buf.iter_mut().zip(state.to_host.drain(..amount)) {
            *slot = byte;
        }

        Ok(amount)
    }
}

impl io::Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.shared.state();

        if state.disconnected {
            return Err(unplugged());
        }

        state.from_host.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn try_clone_port(&self) -> io::Result<Box<dyn Port>> {
        Ok(Box::new(MockPort {
            shared: Arc::clone(&self.shared),
            timeout: self.timeout,
        }))
    }
}

/// Opens [`MockDevice`]s by path.
///
/// Paths which were never added can't be opened, just like an absent serial port.
#[derive(Debug, Clone, Default)]
pub struct MockOpener {
    devices: Arc<Mutex<HashMap<String, MockDevice>>>,
}

impl MockOpener {
    /// Plug in a mocked device at the given path.
    /// Adding the same path again gives back the existing device.
    pub fn add(&self, path: &str) -> MockDevice {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(path.to_owned())
            .or_default()
            .clone()
    }

    /// The mocked device at the given path, if one was added.
    pub fn get(&self, path: &str) -> Option<MockDevice> {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }
}

impl Opener for MockOpener {
    fn open(
        &self,
        device: &Device,
        read_timeout: Duration,
    ) -> Result<Box<dyn Port>, SerialPortError> {
        let mock = self.get(&device.path).ok_or_else(|| SerialPortError::Open {
            path: device.path.clone(),
            problem: "no such mock device".into(),
        })?;

        if mock.shared.state().disconnected {
            return Err(SerialPortError::Disconnected);
        }

        info!(%device, "Opening mock");

        Ok(Box::new(MockPort {
            shared: mock.shared,
            timeout: read_timeout,
        }))
    }
}
