use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use serde::Serialize;

/// Result of one check-and-count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub used: u32,
    pub remaining: u32,
}

/// Per-user query budget for the current UTC day
#[derive(Clone)]
pub struct DailyRateLimiter {
    counts: Arc<DashMap<String, (NaiveDate, u32)>>,
    daily_limit: u32,
}

impl DailyRateLimiter {
    pub fn new(daily_limit: u32) -> Self {
        Self {
            counts: Arc::new(DashMap::new()),
            daily_limit,
        }
    }

    pub fn daily_limit(&self) -> u32 {
        self.daily_limit
    }

    /// Count one query for `user_id` if the budget allows it
    pub fn check(&self, user_id: &str) -> RateLimitStatus {
        self.check_on(user_id, Utc::now().date_naive())
    }

    /// Same as [`check`](Self::check) with an explicit day
    pub fn check_on(&self, user_id: &str, today: NaiveDate) -> RateLimitStatus {
        // entry() holds the shard lock, so check and increment are atomic
        let mut entry = self.counts.entry(user_id.to_string()).or_insert((today, 0));
        let (day, count) = entry.value_mut();
        if *day != today {
            *day = today;
            *count = 0;
        }

        if *count >= self.daily_limit {
            return RateLimitStatus {
                allowed: false,
                used: *count,
                remaining: 0,
            };
        }

        *count += 1;
        RateLimitStatus {
            allowed: true,
            used: *count,
            remaining: self.daily_limit - *count,
        }
    }

    /// Queries counted today, without counting one
    pub fn used(&self, user_id: &str) -> u32 {
        let today = Utc::now().date_naive();
        self.counts
            .get(user_id)
            .filter(|e| e.value().0 == today)
            .map(|e| e.value().1)
            .unwrap_or(0)
    }

    /// Drop users with no queries today (call periodically)
    pub fn cleanup(&self) -> usize {
        self.cleanup_on(Utc::now().date_naive())
    }

    pub fn cleanup_on(&self, today: NaiveDate) -> usize {
        let before = self.counts.len();
        self.counts.retain(|_, (day, _)| *day == today);
        before.saturating_sub(self.counts.len())
    }

    pub fn tracked_users(&self) -> usize {
        self.counts.len()
    }
}
