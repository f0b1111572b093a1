use thiserror::Error;

/// Error taxonomy for the gateway.
///
/// Component operations bubble these up unchanged; only the HTTP layer maps
/// them to status codes. `Throttled` and `Transient` are retryable by
/// session rotation, everything else is terminal for the operation at hand.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("content hash does not match")]
    InvalidHash,

    #[error("remote store reports no such item")]
    NotFound,

    #[error("requested range not satisfiable for size {size}")]
    RangeNotSatisfiable { size: u64 },

    #[error("remote store throttled the session, asked to wait {wait_secs}s")]
    Throttled { wait_secs: u64 },

    #[error("transient remote failure: {0}")]
    Transient(String),

    #[error("client disconnected")]
    ClientDisconnected,

    #[error("operation cancelled by shutdown")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Db(#[from] sea_orm::DbErr),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GatewayError {
    /// Whether rotating to another session and retrying can help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Throttled { .. } | GatewayError::Transient(_)
        )
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;
