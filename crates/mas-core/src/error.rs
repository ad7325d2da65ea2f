//! Framework error type.
//!
//! Sub-crates define their own error enums and either convert into `MasError`
//! via `From` impls or wrap it as one variant.  Both patterns are acceptable;
//! prefer whichever keeps error sites clean.

use thiserror::Error;

/// The top-level error type for `mas-core` and a common base for sub-crates.
#[derive(Debug, Error)]
pub enum MasError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("message codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shorthand result type for all `mas-*` crates.
pub type MasResult<T> = Result<T, MasError>;
