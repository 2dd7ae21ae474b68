// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `CredentialProvider` implementations.

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use sw_core::{Credential, CredentialProvider};

const ENV_PREFIX: &str = "STEPWISE_CRED_";

/// Looks credentials up in the process environment as `STEPWISE_CRED_<NAME>`,
/// uppercased. The raw string value is wrapped as a JSON string; callers
/// needing structured credentials should parse it themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentialProvider;

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn named_credential(&self, name: &str) -> Option<Credential> {
        let var = format!("{ENV_PREFIX}{}", name.to_uppercase());
        std::env::var(var).ok().map(|raw| Credential::new(Value::String(raw)))
    }
}

/// An in-memory credential provider for tests, seeded with fixed values.
#[derive(Default)]
pub struct FakeCredentialProvider {
    credentials: Mutex<IndexMap<String, Value>>,
}

impl FakeCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(self, name: impl Into<String>, value: Value) -> Self {
        self.credentials.lock().insert(name.into(), value);
        self
    }
}

#[async_trait]
impl CredentialProvider for FakeCredentialProvider {
    async fn named_credential(&self, name: &str) -> Option<Credential> {
        self.credentials.lock().get(name).cloned().map(Credential::new)
    }
}
