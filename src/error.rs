//! Error types for the stream mixer

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Socket level failures. All of these are fatal to the ingest loop.
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Invalid listen address: {0}")]
    InvalidAddress(String),

    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
}

/// Malformed datagrams. Never fatal: the packet is dropped and logged.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Packet too small for length prefix: {0} bytes")]
    TooShort(usize),

    #[error("Metadata length {declared} exceeds packet length {available}")]
    LengthOverflow { declared: usize, available: usize },

    #[error("Metadata is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("Metadata is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Metadata is not a JSON object")]
    NotAnObject,

    #[error("Invalid talkgroup id: {0}")]
    InvalidChannelId(String),
}

/// Failures on the PCM output path. Fatal to the mix loop.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Output sink closed (broken pipe)")]
    Closed,

    #[error("Output write failed: {0}")]
    WriteFailed(std::io::Error),
}

impl From<std::io::Error> for OutputError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::BrokenPipe => OutputError::Closed,
            _ => OutputError::WriteFailed(e),
        }
    }
}

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broken_pipe_maps_to_closed() {
        let err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert!(matches!(OutputError::from(err), OutputError::Closed));

        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert!(matches!(OutputError::from(err), OutputError::WriteFailed(_)));
    }
}
