// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Session persistence for the pipeline execution core (C7, spec.md §4.7).
//!
//! [`SessionStore`] is the raw, byte-oriented façade a storage backend
//! implements; [`SessionStoreFacade`] wraps one with a [`ConverterRegistry`]
//! to give the executor a value-oriented API. Two backends ship here:
//! [`InMemorySessionStore`] for tests and ephemeral runs, and
//! [`JsonlSessionStore`] for durable, crash-recoverable storage.

mod converter;
mod facade;
mod jsonl;
mod memory;
mod session_store;

pub use converter::{Converter, ConverterError, ConverterRegistry, JsonConverter};
pub use facade::SessionStoreFacade;
pub use jsonl::{default_root, JsonlSessionStore};
pub use memory::InMemorySessionStore;
pub use session_store::{
    load_restart_data, step_id_from_result_key, GlobalRecord, ResultRecord, RestartData,
    SessionHistoryEntry, SessionStatus, SessionStore, StatusRecord, StepStatus, StorageError,
};
