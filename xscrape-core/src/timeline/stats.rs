use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountCount {
    pub handle: String,
    pub posts: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountFailure {
    pub handle: String,
    pub reason: String,
}

/// Aggregate for one invocation. Collaborators only append events.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub accounts_processed: usize,
    pub accounts_failed: usize,
    pub total_posts: usize,
    pub posts_per_account: Vec<AccountCount>,
    pub failures: Vec<AccountFailure>,
    pub errors: Vec<String>,
    pub duration_secs: Option<f64>,
}

impl RunStats {
    pub fn posts_for(&self, handle: &str) -> Option<usize> {
        self.posts_per_account
            .iter()
            .find(|entry| entry.handle == handle)
            .map(|entry| entry.posts)
    }
}

pub trait StatsRecorder: Send + Sync {
    fn on_run_start(&self) {}
    fn on_run_end(&self) {}
    fn on_account_success(&self, handle: &str, count: usize);
    fn on_account_failure(&self, handle: &str, reason: &str);
    fn on_error(&self, message: &str);
    fn summary(&self) -> RunStats;
}

#[derive(Debug, Default)]
pub struct StatsCollector {
    inner: Mutex<RunStats>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, f: impl FnOnce(&mut RunStats)) {
        if let Ok(mut guard) = self.inner.lock() {
            f(&mut guard);
        }
    }
}

impl StatsRecorder for StatsCollector {
    fn on_run_start(&self) {
        self.update(|stats| stats.started_at = Some(Utc::now()));
    }

    fn on_run_end(&self) {
        self.update(|stats| {
            let now = Utc::now();
            stats.finished_at = Some(now);
            stats.duration_secs = stats
                .started_at
                .map(|start| (now - start).num_milliseconds() as f64 / 1000.0);
        });
    }

    fn on_account_success(&self, handle: &str, count: usize) {
        self.update(|stats| {
            stats.accounts_processed += 1;
            stats.total_posts += count;
            stats.posts_per_account.push(AccountCount {
                handle: handle.to_string(),
                posts: count,
            });
        });
    }

    fn on_account_failure(&self, handle: &str, reason: &str) {
        self.update(|stats| {
            stats.accounts_failed += 1;
            stats.failures.push(AccountFailure {
                handle: handle.to_string(),
                reason: reason.to_string(),
            });
        });
    }

    fn on_error(&self, message: &str) {
        self.update(|stats| stats.errors.push(message.to_string()));
    }

    fn summary(&self) -> RunStats {
        self.inner
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_aggregates_events_in_order() {
        let stats = StatsCollector::new();
        stats.on_run_start();
        stats.on_account_success("foo", 3);
        stats.on_account_failure("bar", "not_found");
        stats.on_account_success("baz", 2);
        stats.on_error("bar: account does not exist");
        stats.on_run_end();

        let summary = stats.summary();
        assert_eq!(summary.accounts_processed, 2);
        assert_eq!(summary.accounts_failed, 1);
        assert_eq!(summary.total_posts, 5);
        assert_eq!(summary.posts_for("baz"), Some(2));
        assert_eq!(summary.posts_for("bar"), None);
        assert_eq!(summary.posts_per_account[0].handle, "foo");
        assert_eq!(summary.failures[0].reason, "not_found");
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.duration_secs.unwrap() >= 0.0);
    }
}
