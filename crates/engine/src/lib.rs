// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sw-engine: the pieces of the pipeline execution core that drive
//! `sw-core`'s data model forward — the step invoker (C4), the pipeline
//! executor state machine (C8), the fork/split concurrency engine (C9), and
//! restart-point computation (spec.md §4.1 step 3).
//!
//! Session persistence lives in `sw-storage`; `sw-engine` only consumes it
//! through [`sw_storage::SessionStoreFacade`].

pub mod config;
pub mod error;
pub mod executor;
mod fork_split;
pub mod id_factory;
pub mod invoker;
pub mod restart;
mod retry;

pub use config::ExecutorConfig;
pub use error::EngineError;
pub use executor::{ExecutionResult, PipelineExecutor, RunStatus, SessionRef};
pub use id_factory::IdFactory;
pub use invoker::{NativeStep, ScriptEngine, StepInvoker, StepOutcome, SyncNativeStep, SCRIPT_PACKAGE};
pub use restart::{compute_restart, RestartPlan};
