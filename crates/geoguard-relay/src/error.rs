//! Relay error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Runtime channel closed")]
    ChannelClosed,

    #[error("Privileged context dropped the reply")]
    ReplyDropped,

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Unexpected response to {0}")]
    UnexpectedResponse(&'static str),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
