use thiserror::Error;

pub type LwResult<T> = Result<T, LwError>;

/// Error taxonomy shared by the node and the escrow service.
///
/// Engines return these; the HTTP surfaces map them to status codes at the
/// boundary. `Seen` is deliberately absent: a duplicate envelope is a normal
/// outcome, not an error.
#[derive(Debug, Error)]
pub enum LwError {
    #[error("config error: {0}")]
    Config(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("chain mismatch: local tip {local_tip:?} != prev {prev_hash:?}")]
    ChainMismatch {
        local_tip: String,
        prev_hash: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("upstream error: {0}")]
    BadGateway(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LwError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        LwError::Protocol(msg.into())
    }

    pub fn crypto(msg: impl Into<String>) -> Self {
        LwError::Crypto(msg.into())
    }
}
