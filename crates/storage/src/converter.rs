// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pluggable value (de)serialization for persisted step results, audits,
//! and globals (spec.md §4.7 "Session converters").
//!
//! A [`Converter`] is tried in declaration order by [`ConverterRegistry`];
//! the last registered entry is the universal default and must accept
//! everything. The selected converter's `name()` is stored alongside the
//! bytes so [`ConverterRegistry::deserialize`] can locate it again without
//! re-running `can_convert`.

use serde_json::Value;

/// A named, ordered pair of (de)serialization functions selected by a
/// predicate over the value being persisted.
pub trait Converter: Send + Sync {
    /// Unique name stored alongside serialized bytes.
    fn name(&self) -> &str;

    /// Whether this converter accepts `value`. The registry tries
    /// converters in order and uses the first match.
    fn can_convert(&self, value: &Value) -> bool;

    fn serialize(&self, value: &Value) -> Result<Vec<u8>, ConverterError>;

    fn deserialize(&self, bytes: &[u8]) -> Result<Value, ConverterError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ConverterError {
    #[error("serialization failed: {0}")]
    Serialize(String),
    #[error("deserialization failed: {0}")]
    Deserialize(String),
    #[error("no converter named '{0}' is registered")]
    UnknownConverter(String),
    #[error("value rejected by every registered converter")]
    Unconvertible,
}

/// The plain JSON converter. Accepts every value; always registered last
/// as the universal default unless the caller overrides the registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonConverter;

impl Converter for JsonConverter {
    fn name(&self) -> &str {
        "json"
    }

    fn can_convert(&self, _value: &Value) -> bool {
        true
    }

    fn serialize(&self, value: &Value) -> Result<Vec<u8>, ConverterError> {
        serde_json::to_vec(value).map_err(|e| ConverterError::Serialize(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value, ConverterError> {
        serde_json::from_slice(bytes).map_err(|e| ConverterError::Deserialize(e.to_string()))
    }
}

/// An ordered, named list of [`Converter`]s. `serialize` tries each in turn
/// and uses the first whose `can_convert` accepts the value; a value no
/// converter accepts is reported via [`ConverterError::Unconvertible`]
/// rather than panicking — the caller (the session store façade) turns
/// this into a dropped-with-warning write, not a blocked step (§4.7).
pub struct ConverterRegistry {
    converters: Vec<Box<dyn Converter>>,
}

impl ConverterRegistry {
    /// A registry with only the universal JSON default.
    pub fn new() -> Self {
        Self {
            converters: vec![Box::new(JsonConverter)],
        }
    }

    /// Registers `converter` ahead of the existing chain (still behind any
    /// converter already pushed earlier this call sequence), preserving the
    /// invariant that the JSON default stays last.
    pub fn with_converter(mut self, converter: Box<dyn Converter>) -> Self {
        let last = self.converters.pop();
        self.converters.push(converter);
        if let Some(default) = last {
            self.converters.push(default);
        }
        self
    }

    pub fn serialize(&self, value: &Value) -> Result<(String, Vec<u8>), ConverterError> {
        for converter in &self.converters {
            if converter.can_convert(value) {
                let bytes = converter.serialize(value)?;
                return Ok((converter.name().to_string(), bytes));
            }
        }
        Err(ConverterError::Unconvertible)
    }

    pub fn deserialize(&self, name: &str, bytes: &[u8]) -> Result<Value, ConverterError> {
        self.converters
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| ConverterError::UnknownConverter(name.to_string()))?
            .deserialize(bytes)
    }
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
