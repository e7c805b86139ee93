use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{device::Device, error::Error, log_sink::Rotation};

/// Picks up serial ports which were not configured explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoDetect {
    /// Ports whose path starts with this are used.
    pub prefix: String,

    /// The baud rate detected ports are opened with.
    pub baud: u32,
}

impl Default for AutoDetect {
    fn default() -> Self {
        Self {
            prefix: "/dev/ttyUSB".into(),
            baud: 115_200,
        }
    }
}

/// The configuration used for running the server.
///
/// Any field left out of a configuration file gets its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Devices to open at startup, in this order.
    pub devices: Vec<Device>,

    /// Also open ports found by scanning, after the configured devices.
    /// `None` disables scanning.
    pub auto_detect: Option<AutoDetect>,

    /// Where the per-device logs are written.
    pub log_dir: PathBuf,

    /// When to rotate the per-device logs.
    pub rotation: Rotation,

    /// How long a single read waits for a line before checking for shutdown.
    pub read_timeout_ms: u64,

    /// Lines which may be waiting on the hub before device readers have to wait.
    pub hub_capacity: usize,

    /// Lines which may be waiting on a single subscriber before it counts as lagging and is dropped.
    pub subscriber_capacity: usize,

    /// The HTTP port.
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            devices: vec![],
            auto_detect: Some(AutoDetect::default()),
            log_dir: PathBuf::from("logs"),
            rotation: Rotation::default(),
            read_timeout_ms: 100,
            hub_capacity: 1024,
            subscriber_capacity: 256,
            port: crate::server::DEFAULT_PORT,
        }
    }
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Self::ron()
            .from_str::<Config>(input)
            .map_err(|e| Error::BadConfig(format!("Not valid RON: {e}")))
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            devices: vec![
                Device::new("console", "/dev/ttyACM0", 115_200),
                Device::new("modem", "/dev/ttyS1", 9_600),
            ],
            ..Default::default()
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> String {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .expect("Config should serialize")
    }

    /// Setup a new, validated configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let path = p.as_ref();

        let s = std::fs::read_to_string(path)
            .map_err(|e| Error::BadConfig(format!("Could not read {path:?}: {e}")))?;

        let config = Self::deserialize(&s)?;
        config.validate()?;

        Ok(config)
    }

    /// The read timeout.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// The configured devices followed by any detected ones.
    pub fn resolve_devices(&self) -> Vec<Device> {
        let mut devices = self.devices.clone();

        if self.auto_detect.is_some() {
            match serialport::available_ports() {
                Ok(ports) => {
                    let paths = ports.into_iter().map(|port| port.port_name).collect();
                    devices.extend(self.detected(paths));
                }
                Err(e) => warn!(%e, "Could not list serial ports"),
            }
        }

        devices
    }

    /// Turn the paths of available ports into devices.
    ///
    /// Paths are sorted, those configured already are skipped,
    /// and names are `device0`, `device1`, ... except those taken by configured devices.
    fn detected(&self, mut available: Vec<String>) -> Vec<Device> {
        let Some(auto_detect) = &self.auto_detect else {
            return vec![];
        };

        available.sort();
        available.dedup();

        let mut names = (0..)
            .map(|n| format!("device{n}"))
            .filter(|name| !self.devices.iter().any(|device| &device.name == name));

        available
            .into_iter()
            .filter(|path| path.starts_with(&auto_detect.prefix))
            .filter(|path| !self.devices.iter().any(|device| &device.path == path))
            .filter_map(|path| {
                let name = names.next()?;
                debug!(%name, %path, "Detected");
                Some(Device::new(&name, &path, auto_detect.baud))
            })
            .collect()
    }

    fn check_names(&self) -> Result<(), Error> {
        for (index, device) in self.devices.iter().enumerate() {
            let name = &device.name;

            if name.trim().is_empty() {
                return Err(Error::BadConfig(format!(
                    "The device with index {index} (zero indexed) has no name."
                )));
            }

            if name.starts_with('.') || name.contains(['/', '\\']) {
                return Err(Error::BadConfig(format!(
                    "The device name `{name}` is used as a log file name, so it may not start with a dot or contain path separators."
                )));
            }
        }

        Ok(())
    }

    fn check_duplicates(&self) -> Result<(), Error> {
        let duplicates = self
            .devices
            .iter()
            .map(|device| &device.name)
            .duplicates()
            .collect::<Vec<_>>();

        if duplicates.is_empty() {
            Ok(())
        } else {
            Err(Error::BadConfig(format!(
                "Device names must be unique, they key commands and logs. Duplicates: {duplicates:?}"
            )))
        }
    }

    fn check_numbers(&self) -> Result<(), Error> {
        if let Some(device) = self.devices.iter().find(|device| device.baud == 0) {
            return Err(Error::BadConfig(format!(
                "The device `{}` has a baud rate of zero.",
                device.name
            )));
        }

        if matches!(&self.auto_detect, Some(auto_detect) if auto_detect.baud == 0) {
            return Err(Error::BadConfig("Auto detection has a baud rate of zero.".into()));
        }

        for (field, value) in [
            ("read_timeout_ms", self.read_timeout_ms as usize),
            ("hub_capacity", self.hub_capacity),
            ("subscriber_capacity", self.subscriber_capacity),
        ] {
            if value == 0 {
                return Err(Error::BadConfig(format!("`{field}` must be above zero.")));
            }
        }

        Ok(())
    }

    /// Check the invariants the server relies on.
    pub fn validate(&self) -> Result<(), Error> {
        self.check_names()?;
        self.check_duplicates()?;
        self.check_numbers()?;

        Ok(())
    }
}
