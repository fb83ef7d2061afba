//! Core Error Types

use thiserror::Error;

/// Errors raised by the device core
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("component init failed: {0}")]
    Init(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("audio io error: {0}")]
    Io(String),

    #[error("front-end error: {0}")]
    Front(#[from] hitony_front::FrontError),

    #[error("transport error: {0}")]
    Link(#[from] hitony_link::LinkError),

    #[error("channel closed - peer worker is gone")]
    ChannelClosed,
}

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;
