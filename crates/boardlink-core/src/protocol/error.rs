//! Link errors

use thiserror::Error;

/// Errors that can occur while configuring or driving a board link
#[derive(Error, Debug)]
pub enum LinkError {
    /// The serial driver reported a failure
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// The device path does not exist
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// The framed message would overflow the board's receive buffer
    #[error("Message too long: {len} bytes, at most {max} allowed")]
    MessageTooLong {
        /// Frame length the payload would need
        len: usize,
        /// Longest frame the board accepts
        max: usize,
    },

    /// The payload cannot be sent as one line
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// A configuration value is out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configuration text is not valid JSON for `LinkConfig`
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// The link worker has exited and accepts no more messages
    #[error("Link worker has stopped")]
    Stopped,

    /// The worker thread could not be created
    #[error("Failed to start link worker: {0}")]
    WorkerSpawn(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<serialport::Error> for LinkError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::NoDevice => LinkError::PortNotFound(e.description),
            _ => LinkError::SerialError(e.to_string()),
        }
    }
}
