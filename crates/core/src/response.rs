// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! [`StepResponse`], the uniform shape every step invocation resolves to.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const GLOBAL_PREFIX: &str = "$globals.";
const GLOBAL_LINK_PREFIX: &str = "$globalLink.";

/// The result of invoking a single step (§3 "StepResponse").
///
/// `namedReturns` entries keyed `$globals.<name>` or `$globalLink.<name>`
/// are not ordinary named outputs: the executor applies them to the
/// context's `globals` (or `GlobalLinks`) map when the step finishes
/// (§4.1-e, §4.8).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_return: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub named_returns: Option<IndexMap<String, Value>>,
}

impl StepResponse {
    pub fn primary(value: Value) -> Self {
        Self {
            primary_return: Some(value),
            named_returns: None,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_named(mut self, key: impl Into<String>, value: Value) -> Self {
        self.named_returns
            .get_or_insert_with(IndexMap::new)
            .insert(key.into(), value);
        self
    }

    /// Splits `namedReturns` into ordinary named outputs and the two kinds
    /// of global mutation, preserving declaration order within each group.
    pub fn global_mutations(&self) -> GlobalMutations {
        let mut globals = Vec::new();
        let mut global_links = Vec::new();
        if let Some(named) = &self.named_returns {
            for (key, value) in named {
                if let Some(name) = key.strip_prefix(GLOBAL_PREFIX) {
                    globals.push((name.to_string(), value.clone()));
                } else if let Some(name) = key.strip_prefix(GLOBAL_LINK_PREFIX) {
                    global_links.push((name.to_string(), value.clone()));
                }
            }
        }
        GlobalMutations {
            globals,
            global_links,
        }
    }

    /// `namedReturns` entries that are not global mutations.
    pub fn ordinary_named_returns(&self) -> IndexMap<String, Value> {
        self.named_returns
            .iter()
            .flatten()
            .filter(|(k, _)| !k.starts_with(GLOBAL_PREFIX) && !k.starts_with(GLOBAL_LINK_PREFIX))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// The global-mutating entries extracted from a [`StepResponse`]'s
/// `namedReturns`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalMutations {
    pub globals: Vec<(String, Value)>,
    pub global_links: Vec<(String, Value)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn primary_only_response() {
        let r = StepResponse::primary(json!("RAW"));
        assert_eq!(r.primary_return, Some(json!("RAW")));
        assert!(r.named_returns.is_none());
    }

    #[test]
    fn global_mutations_are_split_from_ordinary_returns() {
        let r = StepResponse::empty()
            .with_named("$globals.x", json!(42))
            .with_named("$globalLink.y", json!("path.to.y"))
            .with_named("plainKey", json!("value"));

        let mutations = r.global_mutations();
        assert_eq!(mutations.globals, vec![("x".to_string(), json!(42))]);
        assert_eq!(
            mutations.global_links,
            vec![("y".to_string(), json!("path.to.y"))]
        );

        let ordinary = r.ordinary_named_returns();
        assert_eq!(ordinary.len(), 1);
        assert_eq!(ordinary.get("plainKey"), Some(&json!("value")));
    }

    #[test]
    fn no_named_returns_yields_empty_mutations() {
        let r = StepResponse::primary(json!(1));
        let mutations = r.global_mutations();
        assert!(mutations.globals.is_empty());
        assert!(mutations.global_links.is_empty());
    }

    #[test]
    fn serde_round_trip_omits_absent_fields() {
        let r = StepResponse::primary(json!("RAW"));
        let json = serde_json::to_string(&r).unwrap();
        assert!(!json.contains("named_returns"));
        let back: StepResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
