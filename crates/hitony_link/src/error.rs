//! Transport Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("invalid server url: {0}")]
    Url(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("transport closed")]
    Closed,
}

pub type LinkResult<T> = Result<T, LinkError>;
