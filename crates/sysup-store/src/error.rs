use thiserror::Error;

use crate::StateKey;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid value for {key}: value must not be empty")]
    InvalidValue { key: StateKey },

    #[error("failed to decode {key}: {reason}")]
    Decode { key: StateKey, reason: String },

    #[error("inconsistent session record: {0}")]
    Inconsistent(&'static str),

    #[error("{0:#}")]
    Persist(anyhow::Error),
}
