// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential lookup interface (§6 "Credential provider").
//!
//! Credentials are opaque to the core: the mapper's `%name` prefix asks the
//! provider for a value and hands it to the step body unexamined.

use async_trait::async_trait;
use serde_json::Value;

/// An opaque credential payload. The core never interprets its contents.
#[derive(Debug, Clone, PartialEq)]
pub struct Credential(pub Value);

impl Credential {
    pub fn new(value: Value) -> Self {
        Self(value)
    }
}

/// Resolves named credentials for the `%name` mapper prefix.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn named_credential(&self, name: &str) -> Option<Credential>;
}

/// A provider with no credentials configured. Every lookup returns `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentialProvider;

#[async_trait]
impl CredentialProvider for NoCredentialProvider {
    async fn named_credential(&self, _name: &str) -> Option<Credential> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_credential_provider_always_misses() {
        let provider = NoCredentialProvider;
        assert!(provider.named_credential("anything").await.is_none());
    }

    #[test]
    fn credential_wraps_opaque_value() {
        let cred = Credential::new(serde_json::json!({"token": "abc"}));
        assert_eq!(cred.0["token"], "abc");
    }
}
