use std::io;

use thiserror::Error;

use crate::host::ChannelMode;

/// Result type for host operations
pub type Result<T> = std::result::Result<T, HostError>;

/// Errors that can occur while hosting a child process
#[derive(Error, Debug)]
pub enum HostError {
    #[error("channel is closed")]
    ChannelClosed,

    #[error("{operation} is not supported in {mode:?} mode")]
    Unsupported {
        operation: &'static str,
        mode: ChannelMode,
    },

    #[error("handshake rejected: token does not match invitation")]
    HandshakeRejected,

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("child executable not found")]
    ChildPathNotFound,

    #[error("launch failed: {0}")]
    LaunchFailed(String),

    #[error("environment variable {0} not set or invalid")]
    MissingEnv(&'static str),
}
