//! Reconcile error taxonomy

use crate::store::StoreError;
use machina_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    /// The resource's spec cannot work; the user has to edit it.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Create failed: {0}")]
    CreateFailed(String),

    #[error("Update failed: {0}")]
    UpdateFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Retrieval failed: {0}")]
    RetrievalFailed(String),

    /// Refused to touch a cloud resource that does not carry our ownership tag.
    #[error("Ownership violation: {0}")]
    OwnershipViolation(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),
}

impl ReconcileError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// Wraps a cloud failure. 4xx-shaped failures mean the request itself was
    /// wrong and become [`ReconcileError::InvalidConfiguration`].
    pub fn from_cloud(err: CloudError, wrap: fn(String) -> Self, context: &str) -> Self {
        let message = format!("{}: {}", context, err);
        if err.is_client_error() {
            Self::InvalidConfiguration(message)
        } else {
            wrap(message)
        }
    }

    /// Whether the scheduler should requeue with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidConfiguration(_) | Self::OwnershipViolation(_) => false,
            Self::Cloud(err) => err.is_retryable(),
            _ => true,
        }
    }

    /// Short machine-readable reason for status fields.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration(_) => "InvalidConfiguration",
            Self::CreateFailed(_) => "CreateError",
            Self::UpdateFailed(_) => "UpdateError",
            Self::DeleteFailed(_) => "DeleteError",
            Self::RetrievalFailed(_) => "RetrievalError",
            Self::OwnershipViolation(_) => "OwnershipViolation",
            Self::Store(_) => "StoreError",
            Self::Cloud(_) => "CloudError",
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
