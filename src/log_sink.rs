//! Per-device, append-only log files.
//!
//! Each record is `[YYYY-MM-DD HH:MM:SS] <line>\n`.
//! When a file grows past [`Rotation::max_bytes`] it is renamed to `<device>.log.1`,
//! older segments shift up by one, and the oldest beyond [`Rotation::backups`] is dropped.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// The timestamp format used in log records and line events.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A line read from a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Name of the device which printed the line.
    pub device: String,

    /// When the line was read.
    pub timestamp: DateTime<Local>,

    /// The line, without its line ending.
    pub text: String,
}

impl LogLine {
    /// A line read just now.
    pub fn now(device: &str, text: String) -> Self {
        Self {
            device: device.into(),
            timestamp: Local::now(),
            text,
        }
    }

    /// The line as it appears in the log, newline included.
    pub fn record(&self) -> String {
        format!("[{}] {}\n", self.timestamp.format(TIMESTAMP_FORMAT), self.text)
    }
}

/// How log files are rotated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rotation {
    /// A file is rotated before it would grow past this many bytes.
    /// Zero disables rotation.
    pub max_bytes: u64,

    /// How many rotated segments to keep.
    /// Zero disables rotation.
    pub backups: usize,
}

impl Default for Rotation {
    fn default() -> Self {
        Self {
            max_bytes: 100 * 1024 * 1024,
            backups: 3,
        }
    }
}

impl Rotation {
    fn enabled(&self) -> bool {
        self.max_bytes > 0 && self.backups > 0
    }
}

/// The name of the live log file of a device.
pub fn log_file_name(device: &str) -> String {
    format!("{device}.log")
}

/// Appends lines of one device to its log file.
#[derive(Debug)]
pub struct LogSink {
    path: PathBuf,
    file: File,
    size: u64,
    rotation: Rotation,
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn segment(path: &Path, index: usize) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

impl LogSink {
    /// Open the log of `device` in `dir`, creating both if needed.
    /// An existing log is appended to.
    pub fn open(dir: &Path, device: &str, rotation: Rotation) -> io::Result<Self> {
        fs::create_dir_all(dir)?;

        let path = dir.join(log_file_name(device));
        let file = open_append(&path)?;
        let size = file.metadata()?.len();

        debug!(?path, %size, "Log opened");

        Ok(Self {
            path,
            file,
            size,
            rotation,
        })
    }

    /// Where the live log file is.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append the line and make sure it reached the disk before returning.
    pub fn append(&mut self, line: &LogLine) -> io::Result<()> {
        let record = line.record();
        let len = record.len() as u64;

        if self.rotation.enabled() && self.size > 0 && self.size + len > self.rotation.max_bytes {
            self.rotate()?;
        }

        self.file.write_all(record.as_bytes())?;
        self.file.flush()?;
        self.file.sync_data()?;

        self.size += len;

        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        let backups = self.rotation.backups;

        let oldest = segment(&self.path, backups);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }

        for index in (1..backups).rev() {
            let from = segment(&self.path, index);
            if from.exists() {
                fs::rename(&from, segment(&self.path, index + 1))?;
            }
        }

        fs::rename(&self.path, segment(&self.path, 1))?;

        self.file = open_append(&self.path)?;
        self.size = 0;

        info!(path = ?self.path, "Log rotated");

        Ok(())
    }
}
