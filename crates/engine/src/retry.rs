// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Capped exponential backoff between step retry attempts (spec.md §4.1-d, §5).

use crate::config::ExecutorConfig;
use std::time::Duration;

/// Delay before retry attempt number `attempt` (0-based: the first retry is
/// `attempt == 0`), doubling each time up to `max_backoff`.
pub(crate) fn backoff_delay(config: &ExecutorConfig, attempt: u32) -> Duration {
    let factor = config.backoff_factor.max(1) as u64;
    let millis = config.initial_backoff.as_millis() as u64;
    let scaled = millis.saturating_mul(factor.saturating_pow(attempt));
    Duration::from_millis(scaled).min(config.max_backoff)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_up_to_cap() {
        let config = ExecutorConfig {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_factor: 2,
            default_fork_parallelism: None,
        };
        assert_eq!(backoff_delay(&config, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(200));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(400));
    }

    #[test]
    fn caps_at_max_backoff() {
        let config = ExecutorConfig {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            backoff_factor: 2,
            default_fork_parallelism: None,
        };
        assert_eq!(backoff_delay(&config, 10), Duration::from_secs(1));
    }
}
