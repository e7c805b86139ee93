use std::io;

use thiserror::Error;

/// Any error a serial connection might encounter.
#[derive(Debug, Error)]
pub enum SerialPortError {
    /// The port could not be opened.
    #[error("Could not open port at {path}, problem: {problem}")]
    Open {
        /// The path of the port.
        path: String,

        /// What went wrong.
        problem: String,
    },

    /// IO related errors.
    #[error("Underlying IO problem: {0}")]
    IO(#[from] io::Error),

    /// Serial port disconnected.
    #[error("Serial port disconnected")]
    Disconnected,
}
