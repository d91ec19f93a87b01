//! The permission store seam.
//!
//! Everything that talks to Drive goes through [`PermissionStore`]. The
//! [`DriveStore`] implementation wraps `google-drive3`; [`MemoryStore`] keeps a
//! folder tree in process for tests and offline rehearsal.

pub mod drive;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{DriveItem, Principal, Role, StoredPermission};

pub use drive::DriveStore;
pub use memory::MemoryStore;

/// Errors returned by the permission store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("service unavailable ({status}): {message}")]
    Unavailable { status: u16, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("cancelled by the operator")]
    Cancelled,
}

impl StoreError {
    /// Transient errors are worth retrying; everything else fails the action at once.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Timeout(_) | Self::Transport(_) | Self::Unavailable { .. }
        )
    }

    /// Maps an HTTP status (and Drive's error `reason`, when known) onto the taxonomy.
    pub fn from_status(status: u16, reason: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => Self::Auth(message),
            403 if matches!(reason, Some("rateLimitExceeded" | "userRateLimitExceeded")) => {
                Self::RateLimited(message)
            }
            403 => Self::Forbidden(message),
            404 => Self::NotFound(message),
            408 => Self::Transport(format!("request timeout: {message}")),
            429 => Self::RateLimited(message),
            500..=599 => Self::Unavailable { status, message },
            _ => Self::Rejected { status, message },
        }
    }
}

/// Read and write access to Drive items and their grants.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Item metadata, including its download restriction.
    async fn get_item(&self, file_id: &str) -> Result<DriveItem, StoreError>;

    /// Direct, non-trashed children of a folder.
    async fn list_children(&self, folder_id: &str) -> Result<Vec<DriveItem>, StoreError>;

    async fn list_permissions(&self, file_id: &str) -> Result<Vec<StoredPermission>, StoreError>;

    /// Creates a grant and returns its permission id.
    async fn create_permission(
        &self,
        file_id: &str,
        principal: &Principal,
        role: Role,
    ) -> Result<String, StoreError>;

    async fn update_permission_role(
        &self,
        file_id: &str,
        permission_id: &str,
        role: Role,
    ) -> Result<(), StoreError>;

    async fn delete_permission(&self, file_id: &str, permission_id: &str) -> Result<(), StoreError>;

    async fn set_download_restriction(
        &self,
        file_id: &str,
        restricted: bool,
    ) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_reasons_are_transient() {
        let err = StoreError::from_status(403, Some("userRateLimitExceeded"), "slow down");
        assert!(matches!(err, StoreError::RateLimited(_)));
        assert!(err.is_transient());

        let err = StoreError::from_status(403, Some("insufficientFilePermissions"), "no");
        assert!(matches!(err, StoreError::Forbidden(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn status_classification() {
        assert!(StoreError::from_status(503, None, "").is_transient());
        assert!(StoreError::from_status(429, None, "").is_transient());
        assert!(!StoreError::from_status(404, None, "").is_transient());
        assert!(!StoreError::from_status(400, None, "").is_transient());
        assert!(matches!(StoreError::from_status(401, None, ""), StoreError::Auth(_)));
    }

    #[test]
    fn request_timeout_status_is_transient() {
        let err = StoreError::from_status(408, None, "upstream gave up");
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "transport error: request timeout: upstream gave up");
    }
}
