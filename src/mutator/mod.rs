//! Typed ABI values and the mutation strategies applied to them. `raw` holds the
//! byte-level strategy used when no ABI is available.

pub mod encode;
pub mod num;
pub mod raw;
pub mod types;
pub mod value;

use thiserror::Error;

pub use types::AbiType;
pub use value::{mutate_args, AbiValue};

#[derive(Debug, Error)]
pub enum AbiError {
    #[error("unknown ABI type `{0}`")]
    UnknownType(String),
    #[error("serialized value does not fit a `{expected}` node: {reason}")]
    Shape { expected: String, reason: String },
    #[error("invalid contract ABI: {0}")]
    InvalidAbi(String),
    #[error("malformed serialized value: {0}")]
    Json(#[from] serde_json::Error),
}
