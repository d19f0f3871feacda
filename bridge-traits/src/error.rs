use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid provider data: {0}")]
    InvalidData(String),

    #[error("Remote resource not found: {0}")]
    NotFound(String),

    #[error("Client {client_id} does not support {capability}")]
    CapabilityMissing {
        client_id: String,
        capability: &'static str,
    },

    #[error("Unknown client type: {0}")]
    UnknownClientType(String),
}

impl BridgeError {
    /// Errors worth retrying on the next scheduled run.
    pub fn is_transient(&self) -> bool {
        matches!(self, BridgeError::Network(_) | BridgeError::NotAvailable(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
