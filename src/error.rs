use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors thay may occur in this library.
#[derive(Debug, Error, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub enum Error {
    /// The device is not part of the configuration.
    #[error("The device `{0}` does not exist")]
    UnknownDevice(String),

    /// The device is configured, but has no live connection.
    /// It either could not be opened or it failed while running.
    #[error("The device `{0}` is not available")]
    DeviceUnavailable(String),

    /// A command was missing or contained only whitespace.
    #[error("Missing or empty command for device `{0}`")]
    EmptyCommand(String),

    /// The command could not be put on the wire.
    #[error("Could not write to device `{device}`. Problem: {problem}")]
    WriteFailed {
        /// The device written to.
        device: String,

        /// The underlying issue.
        problem: String,
    },

    /// Bad json.
    #[error("The request `{request}` could not be deserialized. Problem: {problem}")]
    BadJson {
        /// The problematic request.
        request: String,

        /// The deserialization issue.
        problem: String,
    },

    /// The configuration is not valid.
    #[error("Bad configuration: {0}")]
    BadConfig(String),

    /// A log file was asked for which does not exist or may not be served.
    #[error("No such log file: `{0}`")]
    NoSuchLog(String),

    /// Problem with the websocket connection.
    #[error("Websocket issue: {0}")]
    WebsocketIssue(String),

    /// Something went wrong on the server side which the user can't do anything about.
    #[error("Internal issue: {0}")]
    InternalIssue(String),
}

impl Error {
    /// If the error is a [`Error::BadConfig`], get the problem description.
    pub fn try_into_bad_config(self) -> Result<String, Self> {
        if let Self::BadConfig(v) = self {
            Ok(v)
        } else {
            Err(self)
        }
    }
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Self::WebsocketIssue(e.to_string())
    }
}
