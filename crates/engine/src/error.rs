// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine-level error surface.
//!
//! [`ExecutionError`] (sw-core) models the business-level step/routing
//! failures spec.md §7 describes and is captured as `ExecutionResult::error`
//! rather than propagated — a pipeline that fails a step still returns
//! successfully from [`crate::executor::PipelineExecutor::execute`]. A
//! [`StorageError`] reaching the executor is a different class of problem
//! (the backing store itself is unavailable or corrupt): spec.md doesn't
//! describe this case, so `execute` surfaces it as an `Err` instead of
//! folding it into the step-level error model.

use sw_core::ExecutionError;
use sw_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
