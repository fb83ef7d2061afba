//! Front-End Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrontError {
    #[error("invalid front-end configuration: {0}")]
    InvalidConfig(String),

    #[error("front-end input queue full")]
    QueueFull,

    #[error("front-end worker is gone")]
    WorkerGone,
}

pub type FrontResult<T> = Result<T, FrontError>;
