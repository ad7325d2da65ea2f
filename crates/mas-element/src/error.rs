//! Error types for mas-element.

use thiserror::Error;

/// Errors surfaced by element lifecycles and coordination protocols.
#[derive(Debug, Error)]
pub enum ElementError {
    /// Messaging substrate failure (bind conflict, peer gone, codec).
    #[error(transparent)]
    Net(#[from] mas_net::NetError),

    #[error(transparent)]
    Core(#[from] mas_core::MasError),

    /// The manager's sync deadline expired before the roster completed.
    #[error("sync timed out: still waiting for {missing:?}")]
    SyncTimeout { missing: Vec<String> },

    /// The run ended without the protocol reaching its expected state.
    #[error("{element}: {reason}")]
    Aborted { element: String, reason: String },
}

impl ElementError {
    pub fn aborted(element: impl Into<String>, reason: impl Into<String>) -> Self {
        ElementError::Aborted { element: element.into(), reason: reason.into() }
    }
}

/// Alias for `Result<T, ElementError>`.
pub type ElementResult<T> = Result<T, ElementError>;
