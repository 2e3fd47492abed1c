//! Authentication collaborator.
//!
//! Token issuance and encoding live elsewhere. This platform only turns a
//! header-style credential into an opaque [`HivePrincipal`].

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Authentication failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No credential was supplied.
    #[error("credential required")]
    Missing,

    /// Credential was rejected.
    #[error("invalid credential")]
    Invalid,

    /// Principal lacks access.
    #[error("access denied: {0}")]
    Forbidden(String),
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HivePrincipal {
    /// Opaque subject identifier.
    pub subject: String,
    /// Devices this principal may access; `None` means all devices.
    #[serde(default)]
    pub device_ids: Option<BTreeSet<String>>,
}

impl HivePrincipal {
    /// Principal with access to every device.
    #[must_use]
    pub fn unrestricted(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            device_ids: None,
        }
    }

    /// Principal limited to the given devices.
    #[must_use]
    pub fn for_devices<I, S>(subject: impl Into<String>, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subject: subject.into(),
            device_ids: Some(devices.into_iter().map(Into::into).collect()),
        }
    }

    /// Whether this principal may touch `device_id`.
    #[must_use]
    pub fn can_access(&self, device_id: &str) -> bool {
        self.device_ids
            .as_ref()
            .is_none_or(|ids| ids.contains(device_id))
    }
}

/// Resolves credentials to principals.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Authenticate a header-style credential such as `Bearer <token>`.
    async fn authenticate(&self, credential: &str) -> Result<HivePrincipal, AuthError>;
}

/// Strip an optional `Bearer ` prefix from a credential.
#[must_use]
pub fn bearer_token(credential: &str) -> &str {
    let trimmed = credential.trim();
    trimmed
        .strip_prefix("Bearer ")
        .map_or(trimmed, str::trim_start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc"), "abc");
        assert_eq!(bearer_token("  abc "), "abc");
        assert_eq!(bearer_token("Bearer   abc"), "abc");
    }

    #[test]
    fn test_can_access() {
        assert!(HivePrincipal::unrestricted("admin").can_access("d1"));
        let p = HivePrincipal::for_devices("user", ["d1"]);
        assert!(p.can_access("d1"));
        assert!(!p.can_access("d2"));
    }
}
