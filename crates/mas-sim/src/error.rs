//! Error types for mas-sim.

use thiserror::Error;

/// Errors surfaced by scenario validation and the launcher.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("scenario error: {0}")]
    Scenario(String),

    #[error(transparent)]
    Core(#[from] mas_core::MasError),

    #[error(transparent)]
    Element(#[from] mas_element::ElementError),

    #[error(transparent)]
    Output(#[from] mas_output::OutputError),

    #[error("element thread {0} panicked")]
    Panicked(String),
}

/// Alias for `Result<T, SimError>`.
pub type SimResult<T> = Result<T, SimError>;
