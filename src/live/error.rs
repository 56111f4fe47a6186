//! Live registry error types

use thiserror::Error;

use crate::bus::BusError;

#[derive(Error, Debug)]
pub enum LiveError {
    /// No publisher advertises the topic
    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    /// The message bus failed
    #[error(transparent)]
    Bus(#[from] BusError),

    /// The registry has shut down
    #[error("Live registry is closed")]
    RegistryClosed,
}

pub type LiveResult<T> = Result<T, LiveError>;
