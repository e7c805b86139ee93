//! Devices and the table of their live connections.

use std::{
    collections::HashMap,
    fmt::Display,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::serial::Connection;

/// A configured serial endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    /// Unique, stable name. Also names the log file.
    pub name: String,

    /// Where the device lives, likely along the lines of `/dev/ttyUSB0` or `COM3`.
    pub path: String,

    /// Baud rate.
    pub baud: u32,
}

impl Device {
    /// Create a device.
    pub fn new(name: &str, path: &str, baud: u32) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            baud,
        }
    }
}

impl Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}@{})", self.name, self.path, self.baud)
    }
}

/// Where a device is in its lifetime.
///
/// `Configured -> Opening -> Active -> Failed`, or `Opening -> Failed`.
/// There is no way back from `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    /// Known from configuration, nothing attempted yet.
    Configured,

    /// The port is being opened.
    Opening,

    /// Lines are being read.
    Active,

    /// The device could not be opened, or broke while being read.
    Failed,
}

impl DeviceState {
    fn can_become(self, next: DeviceState) -> bool {
        use DeviceState::*;

        matches!(
            (self, next),
            (Configured, Opening) | (Opening, Active) | (Opening, Failed) | (Active, Failed)
        )
    }
}

impl Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeviceState::Configured => "configured",
            DeviceState::Opening => "opening",
            DeviceState::Active => "active",
            DeviceState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A device along with its current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// The device.
    #[serde(flatten)]
    pub device: Device,

    /// Its state.
    pub state: DeviceState,
}

/// The result of looking up a device by name.
#[derive(Debug)]
pub enum Lookup {
    /// No device has this name.
    Unknown,

    /// The device exists but has no live connection.
    Unavailable(DeviceState),

    /// The device can be written to.
    Active(Arc<Connection>),
}

#[derive(Debug)]
struct Slot {
    state: DeviceState,
    connection: Option<Arc<Connection>>,
}

/// All configured devices, and the live connection of those which are active.
///
/// The configured set never changes.
/// Connections come and go as devices become active and fail.
#[derive(Debug)]
pub struct Devices {
    configured: Vec<Device>,
    live: Mutex<HashMap<String, Slot>>,
}

impl Devices {
    /// Track the given devices, all starting out as [`DeviceState::Configured`].
    pub fn new(configured: Vec<Device>) -> Self {
        let live = configured
            .iter()
            .map(|device| {
                (
                    device.name.clone(),
                    Slot {
                        state: DeviceState::Configured,
                        connection: None,
                    },
                )
            })
            .collect();

        Self {
            configured,
            live: Mutex::new(live),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The devices in configuration order.
    pub fn configured(&self) -> &[Device] {
        &self.configured
    }

    /// Device names in configuration order.
    pub fn names(&self) -> Vec<String> {
        self.configured
            .iter()
            .map(|device| device.name.clone())
            .collect()
    }

    /// The state of the named device, if it exists.
    pub fn state(&self, name: &str) -> Option<DeviceState> {
        self.slots().get(name).map(|slot| slot.state)
    }

    /// Every device with its state, in configuration order.
    pub fn statuses(&self) -> Vec<DeviceStatus> {
        let slots = self.slots();

        self.configured
            .iter()
            .map(|device| DeviceStatus {
                device: device.clone(),
                state: slots
                    .get(&device.name)
                    .map(|slot| slot.state)
                    .unwrap_or(DeviceState::Configured),
            })
            .collect()
    }

    fn transition(
        &self,
        name: &str,
        next: DeviceState,
        connection: Option<Arc<Connection>>,
    ) -> bool {
        let mut slots = self.slots();

        let Some(slot) = slots.get_mut(name) else {
            warn!(%name, %next, "Transition for unknown device");
            return false;
        };

        if !slot.state.can_become(next) {
            warn!(%name, from = %slot.state, to = %next, "Refusing state transition");
            return false;
        }

        debug!(%name, from = %slot.state, to = %next, "Device state");
        slot.state = next;
        slot.connection = connection;

        true
    }

    /// Mark the device as being opened.
    pub fn opening(&self, name: &str) -> bool {
        self.transition(name, DeviceState::Opening, None)
    }

    /// Make the connection available for commands.
    pub fn activate(&self, name: &str, connection: Arc<Connection>) -> bool {
        self.transition(name, DeviceState::Active, Some(connection))
    }

    /// Drop the live connection, if any. The device stays failed.
    pub fn fail(&self, name: &str) -> bool {
        self.transition(name, DeviceState::Failed, None)
    }

    /// Find the live connection of a device.
    pub fn lookup(&self, name: &str) -> Lookup {
        match self.slots().get(name) {
            None => Lookup::Unknown,
            Some(Slot {
                connection: Some(connection),
                ..
            }) => Lookup::Active(Arc::clone(connection)),
            Some(slot) => Lookup::Unavailable(slot.state),
        }
    }

    /// How many devices currently have a live connection.
    pub fn active_count(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| slot.connection.is_some())
            .count()
    }
}
