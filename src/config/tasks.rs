// ============================================================================
// Task Tracker Configuration
// ============================================================================

use chrono::Duration;

use super::{bounded_seconds, check_lifetime, env_or};
use crate::error::AppError;
use crate::store::StoreConfig;

const MIN_TASK_TTL_MINUTES: i64 = 5;

#[derive(Clone, Debug)]
pub struct TaskConfig {
    /// Idle lifetime of a task record (floored at five minutes)
    pub ttl_minutes: i64,
    pub max_items: usize,
    /// Per-task cap on detail notes (floored at one)
    pub detail_max_items: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: 180,
            max_items: 2000,
            detail_max_items: 100,
        }
    }
}

impl TaskConfig {
    pub(crate) fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ttl_minutes: env_or("TASK_TTL_MINUTES", defaults.ttl_minutes),
            max_items: env_or("TASK_MAX_ITEMS", defaults.max_items),
            detail_max_items: env_or("TASK_DETAIL_MAX_ITEMS", defaults.detail_max_items),
        }
    }

    pub fn ttl(&self) -> Duration {
        bounded_seconds(self.ttl_minutes.max(MIN_TASK_TTL_MINUTES) as f64 * 60.0)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        check_lifetime(
            "TASK_TTL_MINUTES",
            self.ttl_minutes.max(MIN_TASK_TTL_MINUTES) as f64 * 60.0,
        )
    }

    pub fn detail_cap(&self) -> usize {
        self.detail_max_items.max(1)
    }

    /// Tasks sweep on every operation.
    pub fn store(&self) -> StoreConfig {
        StoreConfig::new(self.max_items, self.ttl(), Duration::zero())
    }
}
