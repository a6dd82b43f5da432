// src/pipeline/rate_limit.rs
//! Per-job minimum re-run interval, independent of storage.

use crate::store::JobRunState;

const MINUTE_MS: i64 = 60_000;

/// True when a job that last ran at `last_ran_at_ms` may run again at
/// `now_ms`. Never-run jobs always may; a `last_ran_at_ms` in the future
/// (clock moved back) counts as not elapsed.
pub fn should_run(last_ran_at_ms: Option<i64>, interval_minutes: u64, now_ms: i64) -> bool {
    let Some(last) = last_ran_at_ms else {
        return true;
    };
    let interval_ms = i64::try_from(interval_minutes)
        .unwrap_or(i64::MAX / MINUTE_MS)
        .saturating_mul(MINUTE_MS);
    now_ms.saturating_sub(last) >= interval_ms
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Run,
    Skip { next_eligible_at_ms: i64 },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimiter {
    pub force: bool,
}

impl RateLimiter {
    pub fn new(force: bool) -> Self {
        Self { force }
    }

    pub fn check(&self, state: Option<&JobRunState>, interval_minutes: u64, now_ms: i64) -> Eligibility {
        let last = state.and_then(|s| s.last_ran_at_ms);
        if self.force || should_run(last, interval_minutes, now_ms) {
            return Eligibility::Run;
        }
        let next = last
            .unwrap_or(now_ms)
            .saturating_add((interval_minutes as i64).saturating_mul(MINUTE_MS));
        Eligibility::Skip {
            next_eligible_at_ms: next,
        }
    }
}
