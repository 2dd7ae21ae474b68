// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Executor tuning knobs (spec.md §4.11).

use std::time::Duration;

/// Retry backoff and fork-parallelism defaults for a [`crate::executor::PipelineExecutor`].
///
/// `spark.forkJoin.parallelism`, when present as a global, overrides
/// `default_fork_parallelism` for a single fork/split invocation (§5).
#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_factor: u32,
    pub default_fork_parallelism: Option<usize>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_factor: 2,
            default_fork_parallelism: None,
        }
    }
}
