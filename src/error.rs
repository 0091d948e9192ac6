use thiserror::Error;

pub type Result<T> = std::result::Result<T, NsPlaneError>;

#[derive(Error, Debug)]
pub enum NsPlaneError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Append to the resource log was rejected or not observed in time.
    /// Nothing may be assumed committed.
    #[error("Store write error on {store}: {message}")]
    StoreWrite { store: String, message: String },

    /// The apply loop can no longer keep the snapshot correct.
    #[error("Store {store} stopped serving: {message}")]
    StoreFatal { store: String, message: String },

    #[error("Store {0} is not ready")]
    StoreNotReady(String),

    #[error("Broker admin call timed out on cluster {cluster} after {timeout_ms}ms")]
    BrokerTimeout { cluster: String, timeout_ms: u64 },

    #[error("Broker unavailable on cluster {cluster}: {message}")]
    BrokerUnavailable { cluster: String, message: String },

    #[error("ACL operation failed for {binding}: {message}")]
    BindingOperation { binding: String, message: String },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Metrics error: {0}")]
    Metrics(String),
}

impl NsPlaneError {
    /// Snapshot corruption or apply-loop loss; the owning process should restart.
    pub fn is_fatal(&self) -> bool {
        matches!(self, NsPlaneError::StoreFatal { .. })
    }

    /// Errors that heal on the next reconciliation cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NsPlaneError::BrokerTimeout { .. }
                | NsPlaneError::BrokerUnavailable { .. }
                | NsPlaneError::BindingOperation { .. }
        )
    }
}

impl From<serde_json::Error> for NsPlaneError {
    fn from(e: serde_json::Error) -> Self {
        NsPlaneError::Serialization(e.to_string())
    }
}

impl From<prometheus::Error> for NsPlaneError {
    fn from(e: prometheus::Error) -> Self {
        NsPlaneError::Metrics(e.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for NsPlaneError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        NsPlaneError::Serialization(e.to_string())
    }
}
