//! Error types for mas-net.

use thiserror::Error;

/// Errors surfaced by the messaging substrate.
///
/// Capability and socket-map misuse are *not* represented here — those are
/// programming errors and panic (see crate docs).
#[derive(Debug, Error)]
pub enum NetError {
    /// The endpoint is already bound by another socket on this host.
    /// Fatal at startup.
    #[error("endpoint {0} is already in use")]
    BindConflict(String),

    /// An endpoint string could not be parsed as `tcp://host:port`.
    #[error("malformed endpoint {0}")]
    BadEndpoint(String),

    /// The peer closed the channel or was never reachable.
    #[error("peer unavailable on {0}")]
    PeerGone(String),

    /// A frame exceeded the wire-format size cap.
    #[error("frame of {got} bytes exceeds the {cap}-byte cap")]
    FrameTooLarge { got: usize, cap: usize },

    /// Envelope (de)serialization failure.
    #[error(transparent)]
    Codec(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<mas_core::MasError> for NetError {
    fn from(e: mas_core::MasError) -> Self {
        match e {
            mas_core::MasError::Codec(e) => NetError::Codec(e),
            mas_core::MasError::Io(e) => NetError::Io(e),
            mas_core::MasError::Config(msg) => {
                NetError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, msg))
            }
        }
    }
}

/// Alias for `Result<T, NetError>`.
pub type NetResult<T> = Result<T, NetError>;
