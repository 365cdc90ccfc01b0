use thiserror::Error;

/// Errors raised by the portal reconciliation core.
#[derive(Debug, Error)]
pub enum PortalError {
    /// No caller, bad session, or a caller without an identity record.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// An entity store read or write failed.
    #[error("Store error: {0}")]
    Store(String),

    /// A stored record could not be mapped onto its entity type.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

pub type Result<T> = std::result::Result<T, PortalError>;
