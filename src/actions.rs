use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{error::Error, log_sink::LogLine};

/// A command a client wants put on the wire of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Name of the device.
    #[serde(default)]
    pub device: String,

    /// What to write. The line terminator is added by the server.
    #[serde(default)]
    pub cmd: String,
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cmd = self.cmd.chars().take(48).collect::<String>();
        write!(f, "{}: `{}`", self.device, cmd.trim())
    }
}

impl Command {
    /// Create a command.
    pub fn new(device: &str, cmd: &str) -> Self {
        Self {
            device: device.into(),
            cmd: cmd.into(),
        }
    }

    /// An example of a command.
    pub fn example() -> Self {
        Self::new("device0", "AT+VERSION")
    }

    /// Turn the command into serialized json.
    pub fn serialize(&self) -> String {
        serde_json::to_string(self).expect("Should serialize well")
    }
}

/// A line pushed to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineEvent {
    /// Name of the device which printed the line.
    pub device: String,

    /// The timestamped line, newline included, exactly as it was logged.
    pub text: String,
}

impl From<&LogLine> for LineEvent {
    fn from(line: &LogLine) -> Self {
        Self {
            device: line.device.clone(),
            text: line.record(),
        }
    }
}

impl LineEvent {
    /// An example of a line event.
    pub fn example() -> Self {
        Self {
            device: "device0".into(),
            text: "[2024-01-01 12:00:00] Booting...\n".into(),
        }
    }
}

/// The kind of problem a failed command ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// The device is not configured.
    UnknownDevice,

    /// The command was missing or empty.
    MissingCommand,

    /// The device is configured but has no live connection.
    DeviceUnavailable,

    /// The device could not be written to.
    WriteFailed,

    /// The request itself was malformed.
    BadRequest,

    /// The server ran into trouble.
    Internal,
}

/// The answer to a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommandReply {
    /// The command was written to the device.
    Ok,

    /// The command was not written.
    Error {
        /// Human readable description.
        msg: String,

        /// Machine readable cause.
        reason: Reason,
    },
}

impl From<&Error> for Reason {
    fn from(error: &Error) -> Self {
        match error {
            Error::UnknownDevice(_) => Reason::UnknownDevice,
            Error::EmptyCommand(_) => Reason::MissingCommand,
            Error::DeviceUnavailable(_) => Reason::DeviceUnavailable,
            Error::WriteFailed { .. } => Reason::WriteFailed,
            Error::BadJson { .. } => Reason::BadRequest,
            Error::BadConfig(_)
            | Error::NoSuchLog(_)
            | Error::WebsocketIssue(_)
            | Error::InternalIssue(_) => Reason::Internal,
        }
    }
}

impl From<Error> for CommandReply {
    fn from(e: Error) -> Self {
        Self::Error {
            msg: e.to_string(),
            reason: Reason::from(&e),
        }
    }
}

impl From<Result<(), Error>> for CommandReply {
    fn from(result: Result<(), Error>) -> Self {
        match result {
            Ok(()) => Self::Ok,
            Err(e) => e.into(),
        }
    }
}

impl CommandReply {
    /// An example of a failed command.
    pub fn example_error() -> Self {
        Error::UnknownDevice("ghost".into()).into()
    }

    /// Did the command go through.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// The failure reason, if any.
    pub fn reason(&self) -> Option<Reason> {
        match self {
            Self::Ok => None,
            Self::Error { reason, .. } => Some(*reason),
        }
    }
}

impl Display for CommandReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandReply::Ok => write!(f, "ok"),
            CommandReply::Error { msg, reason } => write!(f, "error ({reason:?}): {msg}"),
        }
    }
}

/// Anything the server sends over a websocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// A device printed a line.
    Line(LineEvent),

    /// The answer to a command sent on the same socket.
    Reply(CommandReply),
}
