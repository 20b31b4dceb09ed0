use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::browser::{AutomationTelemetry, BrowserMetrics, ProfilePage, RunContext};

use super::account::{AccountOutcome, AccountScraper, TerminalReason};
use super::post::PostRecord;
use super::sink::{ResultSink, SinkKey, StoredLocation};
use super::stats::{RunStats, StatsRecorder};

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub outcomes: Vec<AccountOutcome>,
    pub per_account: Vec<(String, StoredLocation)>,
    pub combined: Option<StoredLocation>,
    pub stats: RunStats,
    pub metrics: BrowserMetrics,
    pub partial_failure: bool,
    pub cancelled: bool,
}

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_TOTAL_FAILURE: u8 = 1;
pub const EXIT_PARTIAL_FAILURE: u8 = 2;
pub const EXIT_INTERRUPTED: u8 = 130;

impl RunReport {
    pub fn total_posts(&self) -> usize {
        self.outcomes.iter().map(|outcome| outcome.posts.len()).sum()
    }

    /// Every configured account produced at least one record.
    pub fn fully_successful(&self) -> bool {
        !self.cancelled && self.outcomes.iter().all(|outcome| !outcome.posts.is_empty())
    }

    /// Accounts were attempted and none produced a record.
    pub fn total_failure(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(|outcome| outcome.posts.is_empty())
    }

    /// Process exit status: interrupted, nothing collected, some accounts
    /// empty, or success.
    pub fn exit_code(&self) -> u8 {
        if self.cancelled {
            EXIT_INTERRUPTED
        } else if self.total_failure() {
            EXIT_TOTAL_FAILURE
        } else if !self.fully_successful() {
            EXIT_PARTIAL_FAILURE
        } else {
            EXIT_SUCCESS
        }
    }
}

/// Runs the account loop over every handle in order through one page,
/// sharing a run-wide seen set, and hands results to the sink and stats.
pub struct Orchestrator {
    scraper: AccountScraper,
    sink: Arc<dyn ResultSink>,
    stats: Arc<dyn StatsRecorder>,
    telemetry: Option<Arc<AutomationTelemetry>>,
    run_id: String,
}

impl Orchestrator {
    pub fn new(
        scraper: AccountScraper,
        sink: Arc<dyn ResultSink>,
        stats: Arc<dyn StatsRecorder>,
    ) -> Self {
        Self {
            scraper,
            sink,
            stats,
            telemetry: None,
            run_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<AutomationTelemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub async fn run(
        &mut self,
        page: &mut dyn ProfilePage,
        accounts: &[String],
        cutoff: Option<DateTime<Utc>>,
    ) -> RunReport {
        self.stats.on_run_start();
        let mut run_seen: HashSet<String> = HashSet::new();
        let mut outcomes: Vec<AccountOutcome> = Vec::with_capacity(accounts.len());
        let mut per_account = Vec::new();
        let mut cancelled = false;

        if accounts.is_empty() {
            error!(run_id = %self.run_id, "no accounts configured to scrape");
        } else {
            info!(
                run_id = %self.run_id,
                accounts = accounts.len(),
                cutoff = ?cutoff,
                "starting scrape run"
            );
        }

        for (index, handle) in accounts.iter().enumerate() {
            if index > 0 {
                let delay = self.scraper.pacer_mut().account_delay();
                info!(delay_ms = delay.as_millis() as u64, next = %handle, "waiting before next account");
                let mut cancel = self.scraper.cancel_signal().clone();
                if !cancel.sleep(delay).await {
                    cancelled = true;
                }
            }
            if cancelled || self.scraper.cancel_signal().is_cancelled() {
                cancelled = true;
                warn!(remaining = accounts.len() - index, "run cancelled, skipping remaining accounts");
                break;
            }

            let started = Instant::now();
            let outcome = self.scrape_guarded(page, handle, cutoff, &mut run_seen).await;
            if outcome.reason == TerminalReason::Cancelled {
                cancelled = true;
            }
            if let Some(location) = self.store(&outcome.posts, SinkKey::Account(handle.clone())).await {
                per_account.push((handle.clone(), location));
            }
            self.report_account(&outcome, started);
            outcomes.push(outcome);
            if cancelled {
                break;
            }
        }

        let combined_posts: Vec<PostRecord> = outcomes
            .iter()
            .flat_map(|outcome| outcome.posts.iter().cloned())
            .collect();
        let combined = self.store(&combined_posts, SinkKey::Combined).await;

        let partial_failure = outcomes.iter().any(|outcome| {
            outcome.posts.is_empty()
                && matches!(
                    outcome.reason,
                    TerminalReason::Error { .. } | TerminalReason::NotFound
                )
        });

        self.stats.on_run_end();
        let report = RunReport {
            run_id: self.run_id.clone(),
            outcomes,
            per_account,
            combined,
            stats: self.stats.summary(),
            metrics: self.scraper.metrics(),
            partial_failure,
            cancelled,
        };
        info!(
            run_id = %report.run_id,
            posts = report.total_posts(),
            partial_failure,
            cancelled,
            "scrape run finished"
        );
        report
    }

    /// A panic inside one account's loop becomes an error outcome for that
    /// account only.
    async fn scrape_guarded(
        &mut self,
        page: &mut dyn ProfilePage,
        handle: &str,
        cutoff: Option<DateTime<Utc>>,
        run_seen: &mut HashSet<String>,
    ) -> AccountOutcome {
        let attempt = AssertUnwindSafe(self.scraper.scrape(page, handle, cutoff, run_seen))
            .catch_unwind()
            .await;
        match attempt {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|text| text.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "account loop panicked".to_string());
                error!(handle = %handle, error = %message, "account loop aborted");
                AccountOutcome {
                    handle: handle.to_string(),
                    posts: Vec::new(),
                    reason: TerminalReason::Error { message },
                    attempts: 0,
                    scroll_passes: 0,
                }
            }
        }
    }

    async fn store(&self, posts: &[PostRecord], key: SinkKey) -> Option<StoredLocation> {
        if posts.is_empty() {
            return None;
        }
        let label = match &key {
            SinkKey::Account(handle) => handle.clone(),
            SinkKey::Combined => "combined".to_string(),
        };
        match self.sink.store(posts, key).await {
            Ok(location) => Some(location),
            Err(err) => {
                error!(key = %label, error = %err, "failed to store results");
                self.stats.on_error(&format!("{label}: {err}"));
                None
            }
        }
    }

    fn report_account(&self, outcome: &AccountOutcome, started: Instant) {
        let count = outcome.posts.len();
        if count > 0 {
            self.stats.on_account_success(&outcome.handle, count);
        } else {
            let reason = match &outcome.reason {
                TerminalReason::Error { message } => message.clone(),
                other => format!("no posts collected ({other})"),
            };
            self.stats.on_account_failure(&outcome.handle, &reason);
        }
        if let TerminalReason::Error { message } = &outcome.reason {
            self.stats
                .on_error(&format!("{}: {message}", outcome.handle));
        }

        if let Some(telemetry) = self.telemetry.as_ref() {
            let run = RunContext {
                timestamp: Utc::now(),
                run_id: self.run_id.clone(),
                handle: outcome.handle.clone(),
                reason: outcome.reason.as_str().to_string(),
                posts: count as u64,
                success: count > 0,
                duration_ms: started.elapsed().as_millis() as i64,
            };
            if let Err(err) = telemetry.record_run(&run) {
                warn!(handle = %outcome.handle, error = %err, "failed to record run");
            }
        }
    }
}
