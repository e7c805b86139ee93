//! Routes commands to the device they name.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    actions::Command,
    device::{Devices, Lookup},
    error::Error,
    serial::Connection,
};

/// Validates commands and writes them to the right device.
#[derive(Debug, Clone)]
pub struct CommandRouter {
    devices: Arc<Devices>,
}

impl CommandRouter {
    /// Route commands to the given devices.
    pub fn new(devices: Arc<Devices>) -> Self {
        Self { devices }
    }

    /// Find the connection a command should be written to.
    ///
    /// A device missing from the configuration is unknown.
    /// A configured device without a live connection is unavailable.
    pub fn resolve(&self, command: &Command) -> Result<Arc<Connection>, Error> {
        match self.devices.lookup(&command.device) {
            Lookup::Unknown => Err(Error::UnknownDevice(command.device.clone())),
            _ if command.cmd.trim().is_empty() => Err(Error::EmptyCommand(command.device.clone())),
            Lookup::Active(connection) => Ok(connection),
            Lookup::Unavailable(state) => {
                debug!(device = %command.device, %state, "Device unavailable");
                Err(Error::DeviceUnavailable(command.device.clone()))
            }
        }
    }

    /// Write the command to its device.
    ///
    /// Returns once the bytes were flushed to the device, or with the reason they weren't.
    pub async fn route(&self, command: Command) -> Result<(), Error> {
        let connection = self.resolve(&command)?;

        info!(%command, "Routing command");

        let Command { device, cmd } = command;

        tokio::task::spawn_blocking(move || connection.write_line(&cmd))
            .await
            .map_err(|e| Error::InternalIssue(format!("Write task failed: {e}")))?
            .map_err(|e| {
                warn!(%device, %e, "Write failed");
                Error::WriteFailed {
                    device,
                    problem: e.to_string(),
                }
            })
    }
}
