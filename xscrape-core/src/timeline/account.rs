use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::browser::{
    telemetry_failure, AutomationTelemetry, BrowserError, BrowserMetrics, BrowserResult,
    CancelSignal, DomContainer, ProfilePage, RemediationAction, RetryPolicy, ScrollPacer,
};
use crate::config::{MarkerSection, ScraperConfig};

use super::assemble::PostAssembler;
use super::extract::{parse_timestamp, FieldExtractor};
use super::post::PostRecord;
use super::selectors::{Field, SelectorTable};

/// Consecutive passes without a new post before the timeline counts as
/// exhausted.
pub const MAX_EMPTY_PASSES: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TerminalReason {
    NotFound,
    Suspended,
    LimitReached,
    CutoffReached,
    Stagnated,
    Error { message: String },
    Cancelled,
}

impl TerminalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalReason::NotFound => "not_found",
            TerminalReason::Suspended => "suspended",
            TerminalReason::LimitReached => "limit_reached",
            TerminalReason::CutoffReached => "cutoff_reached",
            TerminalReason::Stagnated => "stagnated",
            TerminalReason::Error { .. } => "error",
            TerminalReason::Cancelled => "cancelled",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, TerminalReason::Error { .. })
    }
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalReason::Error { message } => write!(f, "error: {message}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Everything an account loop hands back to the orchestrator.
#[derive(Debug, Clone)]
pub struct AccountOutcome {
    pub handle: String,
    pub posts: Vec<PostRecord>,
    pub reason: TerminalReason,
    pub attempts: u32,
    pub scroll_passes: u32,
}

/// Per-account working state; lives only for one loop.
#[derive(Debug)]
pub struct ScrapeRunState {
    pub handle: String,
    pub target: usize,
    pub cutoff: Option<DateTime<Utc>>,
    pub posts: Vec<PostRecord>,
    pub seen: HashSet<String>,
    pub empty_passes: u32,
}

impl ScrapeRunState {
    fn new(handle: &str, target: usize, cutoff: Option<DateTime<Utc>>) -> Self {
        Self {
            handle: handle.to_string(),
            target,
            cutoff,
            posts: Vec::new(),
            seen: HashSet::new(),
            empty_passes: 0,
        }
    }

    fn is_full(&self) -> bool {
        self.posts.len() >= self.target
    }
}

/// True unless the post carries a parseable timestamp strictly older than
/// the cutoff.
pub fn within_cutoff(post: &PostRecord, cutoff: Option<DateTime<Utc>>) -> bool {
    let Some(cutoff) = cutoff else {
        return true;
    };
    match post.timestamp.as_deref().and_then(parse_timestamp) {
        Some(posted) => posted.with_timezone(&Utc) >= cutoff,
        None => true,
    }
}

#[derive(Debug)]
enum Phase {
    Loading { attempt: u32 },
    Verifying { attempt: u32 },
    Extracting,
    Scrolling { new_posts: usize },
    Done(TerminalReason),
}

#[derive(Debug, PartialEq, Eq)]
enum PageVerdict {
    NotFound,
    Suspended,
    RateLimited,
    Ready,
    NoPosts,
}

enum PassResult {
    Continue { new_posts: usize },
    Stop(TerminalReason),
}

enum ScrollStep {
    Continue,
    /// A rate-limit notice forced a reload; the page must be verified again.
    Reloaded,
    Cancelled,
}

/// Drives one profile timeline from navigation to a terminal reason.
pub struct AccountScraper {
    assembler: PostAssembler,
    retry: RetryPolicy,
    pacer: ScrollPacer,
    markers: MarkerSection,
    base_url: String,
    target: usize,
    page_timeout: Duration,
    element_timeout: Duration,
    metrics: Arc<Mutex<BrowserMetrics>>,
    telemetry: Option<Arc<AutomationTelemetry>>,
    cancel: CancelSignal,
}

impl AccountScraper {
    pub fn from_config(config: &ScraperConfig) -> Self {
        let selectors = SelectorTable::with_overrides(&config.selectors);
        let extractor = FieldExtractor::new(
            selectors,
            Duration::from_millis(config.timeouts.attribute_ms),
        );
        Self {
            assembler: PostAssembler::new(extractor, config.base_url.clone()),
            retry: RetryPolicy::new(&config.retry),
            pacer: ScrollPacer::new(config.scroll.clone()),
            markers: config.markers.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            target: config.posts_per_account,
            page_timeout: Duration::from_millis(config.timeouts.page_ms),
            element_timeout: Duration::from_millis(config.timeouts.element_ms),
            metrics: Arc::new(Mutex::new(BrowserMetrics::default())),
            telemetry: None,
            cancel: CancelSignal::never(),
        }
    }

    pub fn with_pacer(mut self, pacer: ScrollPacer) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Mutex<BrowserMetrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<AutomationTelemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn metrics(&self) -> BrowserMetrics {
        self.metrics
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn pacer_mut(&mut self) -> &mut ScrollPacer {
        &mut self.pacer
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    /// Scrapes `handle`, consulting and extending the run-wide `run_seen`
    /// set. Never fails: every problem ends in a `TerminalReason`.
    pub async fn scrape(
        &mut self,
        page: &mut dyn ProfilePage,
        handle: &str,
        cutoff: Option<DateTime<Utc>>,
        run_seen: &mut HashSet<String>,
    ) -> AccountOutcome {
        let span = info_span!("account", handle = %handle);
        self.run(page, handle, cutoff, run_seen)
            .instrument(span)
            .await
    }

    async fn run(
        &mut self,
        page: &mut dyn ProfilePage,
        handle: &str,
        cutoff: Option<DateTime<Utc>>,
        run_seen: &mut HashSet<String>,
    ) -> AccountOutcome {
        let url = format!("{}/{}", self.base_url, handle);
        let mut state = ScrapeRunState::new(handle, self.target, cutoff);
        let mut attempts = 0u32;
        let mut load_attempt = 0u32;
        let mut scroll_passes = 0u32;
        info!(url = %url, target = self.target, "scraping account");

        let mut phase = Phase::Loading { attempt: 0 };
        let reason = loop {
            if self.cancel.is_cancelled() && !matches!(phase, Phase::Done(_)) {
                phase = Phase::Done(TerminalReason::Cancelled);
            }
            phase = match phase {
                Phase::Loading { attempt } => {
                    load_attempt = attempt;
                    attempts = attempt + 1;
                    match self.load(page, &url).await {
                        Ok(()) => Phase::Verifying { attempt },
                        Err(error) if error.is_transient() => {
                            self.backoff(&url, handle, attempt, error).await
                        }
                        Err(error) => {
                            self.record_failure(handle, &url, &error, attempt, RemediationAction::Abort);
                            error!(error = %error, "navigation failed");
                            Phase::Done(TerminalReason::Error {
                                message: error.to_string(),
                            })
                        }
                    }
                }
                Phase::Verifying { attempt } => match self.verify(page).await {
                    Ok(PageVerdict::NotFound) => {
                        warn!("account does not exist");
                        Phase::Done(TerminalReason::NotFound)
                    }
                    Ok(PageVerdict::Suspended) => {
                        warn!("account is suspended");
                        Phase::Done(TerminalReason::Suspended)
                    }
                    Ok(PageVerdict::RateLimited) => {
                        self.bump_metrics(BrowserMetrics::record_rate_limit);
                        let error = BrowserError::RateLimited(format!("{url} shows a rate-limit notice"));
                        self.backoff(&url, handle, attempt, error).await
                    }
                    Ok(PageVerdict::NoPosts) => {
                        let error = BrowserError::Timeout(format!("post containers on {url}"));
                        self.backoff(&url, handle, attempt, error).await
                    }
                    Ok(PageVerdict::Ready) => {
                        // a reloaded timeline starts over from its newest posts
                        state.empty_passes = 0;
                        let settle = self.pacer.settle_delay();
                        if self.cancel.sleep(settle).await {
                            Phase::Extracting
                        } else {
                            Phase::Done(TerminalReason::Cancelled)
                        }
                    }
                    Err(error) if error.is_transient() => {
                        self.backoff(&url, handle, attempt, error).await
                    }
                    Err(error) => Phase::Done(TerminalReason::Error {
                        message: error.to_string(),
                    }),
                },
                Phase::Extracting => match self.extract_pass(page, &mut state, run_seen).await {
                    Ok(PassResult::Continue { new_posts }) => Phase::Scrolling { new_posts },
                    Ok(PassResult::Stop(reason)) => Phase::Done(reason),
                    Err(error) if error.is_transient() => {
                        self.backoff(&url, handle, load_attempt, error).await
                    }
                    Err(error) => {
                        self.record_failure(handle, &url, &error, load_attempt, RemediationAction::Abort);
                        error!(error = %error, "extraction pass failed");
                        Phase::Done(TerminalReason::Error {
                            message: error.to_string(),
                        })
                    }
                },
                Phase::Scrolling { new_posts } => {
                    if new_posts == 0 {
                        state.empty_passes += 1;
                    } else {
                        state.empty_passes = 0;
                    }
                    if state.empty_passes >= MAX_EMPTY_PASSES {
                        info!(passes = state.empty_passes, "no new posts, timeline exhausted");
                        Phase::Done(TerminalReason::Stagnated)
                    } else {
                        scroll_passes += 1;
                        match self.scroll(page).await {
                            Ok(ScrollStep::Continue) => Phase::Extracting,
                            Ok(ScrollStep::Reloaded) => Phase::Verifying {
                                attempt: load_attempt,
                            },
                            Ok(ScrollStep::Cancelled) => Phase::Done(TerminalReason::Cancelled),
                            Err(error) if error.is_transient() => {
                                self.backoff(&url, handle, load_attempt, error).await
                            }
                            Err(error) => {
                                self.record_failure(handle, &url, &error, load_attempt, RemediationAction::Abort);
                                error!(error = %error, "scrolling failed");
                                Phase::Done(TerminalReason::Error {
                                    message: error.to_string(),
                                })
                            }
                        }
                    }
                }
                Phase::Done(reason) => break reason,
            };
        };

        info!(
            posts = state.posts.len(),
            reason = %reason,
            attempts,
            scroll_passes,
            "account finished"
        );
        AccountOutcome {
            handle: state.handle,
            posts: state.posts,
            reason,
            attempts,
            scroll_passes,
        }
    }

    /// Records a failed attempt and either schedules the next load after
    /// `retry_delay * 2^attempt` or gives up. Collected posts survive the
    /// reload; the seen set filters them out again.
    async fn backoff(
        &mut self,
        url: &str,
        handle: &str,
        attempt: u32,
        error: BrowserError,
    ) -> Phase {
        if !self.retry.can_retry(attempt) {
            self.record_failure(handle, url, &error, attempt, RemediationAction::Abort);
            error!(attempts = attempt + 1, error = %error, "giving up on profile");
            return Phase::Done(TerminalReason::Error {
                message: format!("{error} (after {} attempts)", attempt + 1),
            });
        }
        let delay = self.retry.delay_for_attempt(attempt);
        self.record_failure(
            handle,
            url,
            &error,
            attempt,
            RemediationAction::RetryScheduled {
                delay_ms: delay.as_millis() as u64,
            },
        );
        warn!(
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "profile not ready, retrying"
        );
        if self.cancel.sleep(delay).await {
            Phase::Loading {
                attempt: attempt + 1,
            }
        } else {
            Phase::Done(TerminalReason::Cancelled)
        }
    }

    async fn load(&mut self, page: &mut dyn ProfilePage, url: &str) -> BrowserResult<()> {
        let result = self
            .bounded(self.page_timeout, url, page.navigate(url))
            .await;
        if matches!(result, Err(BrowserError::Timeout(_))) {
            self.bump_metrics(BrowserMetrics::record_navigation_timeout);
        }
        result
    }

    async fn verify(&mut self, page: &mut dyn ProfilePage) -> BrowserResult<PageVerdict> {
        let content = self
            .bounded(self.page_timeout, "page content", page.content())
            .await?
            .to_lowercase();
        if contains_any(&content, &self.markers.not_found) {
            return Ok(PageVerdict::NotFound);
        }
        if contains_any(&content, &self.markers.suspended) {
            return Ok(PageVerdict::Suspended);
        }
        if contains_any(&content, &self.markers.rate_limit) {
            return Ok(PageVerdict::RateLimited);
        }
        if self.wait_for_containers(page).await {
            Ok(PageVerdict::Ready)
        } else {
            Ok(PageVerdict::NoPosts)
        }
    }

    async fn wait_for_containers(&self, page: &mut dyn ProfilePage) -> bool {
        let chain = self.assembler.extractor().selectors().chain(Field::TweetArticle);
        for selector in chain {
            let waited = timeout(
                self.element_timeout + Duration::from_millis(500),
                page.wait_for_selector(selector, self.element_timeout),
            )
            .await;
            match waited {
                Ok(Ok(true)) => return true,
                Ok(Ok(false)) => continue,
                Ok(Err(err)) => {
                    debug!(selector = %selector, error = %err, "container wait failed");
                    continue;
                }
                Err(_) => continue,
            }
        }
        false
    }

    async fn visible_containers(
        &self,
        page: &mut dyn ProfilePage,
    ) -> BrowserResult<Vec<Box<dyn DomContainer>>> {
        let chain = self.assembler.extractor().selectors().chain(Field::TweetArticle);
        for selector in chain {
            let containers = self
                .bounded(self.page_timeout, "post containers", page.containers(selector))
                .await?;
            if !containers.is_empty() {
                return Ok(containers);
            }
        }
        Ok(Vec::new())
    }

    async fn extract_pass(
        &mut self,
        page: &mut dyn ProfilePage,
        state: &mut ScrapeRunState,
        run_seen: &mut HashSet<String>,
    ) -> BrowserResult<PassResult> {
        if state.is_full() {
            return Ok(PassResult::Stop(TerminalReason::LimitReached));
        }
        let containers = self.visible_containers(page).await?;
        if containers.is_empty() {
            debug!("no post containers visible");
        }
        self.bump_metrics(|metrics| metrics.record_containers(containers.len() as u64));

        let mut new_posts = 0usize;
        for container in &containers {
            let Some(post) = self
                .assembler
                .assemble(container.as_ref(), &state.handle)
                .await
            else {
                self.bump_metrics(BrowserMetrics::record_extraction_reject);
                continue;
            };
            // without an id a post cannot be deduplicated
            if post.post_id.is_empty() {
                self.bump_metrics(BrowserMetrics::record_extraction_reject);
                continue;
            }
            if state.seen.contains(&post.post_id) || run_seen.contains(&post.post_id) {
                self.bump_metrics(BrowserMetrics::record_duplicate);
                continue;
            }
            if !within_cutoff(&post, state.cutoff) {
                info!(
                    post_id = %post.post_id,
                    timestamp = post.timestamp.as_deref().unwrap_or_default(),
                    collected = state.posts.len(),
                    "reached date cutoff"
                );
                return Ok(PassResult::Stop(TerminalReason::CutoffReached));
            }

            state.seen.insert(post.post_id.clone());
            run_seen.insert(post.post_id.clone());
            debug!(
                post_id = %post.post_id,
                collected = state.posts.len() + 1,
                target = state.target,
                "post accepted"
            );
            state.posts.push(post);
            new_posts += 1;
            self.bump_metrics(BrowserMetrics::record_post_accepted);

            if state.is_full() {
                return Ok(PassResult::Stop(TerminalReason::LimitReached));
            }
        }
        Ok(PassResult::Continue { new_posts })
    }

    /// One scroll step, plus the occasional rate-limit look at the page.
    async fn scroll(&mut self, page: &mut dyn ProfilePage) -> BrowserResult<ScrollStep> {
        let amount = self.pacer.scroll_amount();
        self.bounded(self.page_timeout, "scroll", page.scroll_by(amount))
            .await?;
        self.bump_metrics(BrowserMetrics::record_scroll);

        let pause = self.pacer.scroll_delay();
        if !self.cancel.sleep(pause).await {
            return Ok(ScrollStep::Cancelled);
        }

        if self.pacer.should_check_rate_limit() {
            let content = self
                .bounded(self.page_timeout, "page content", page.content())
                .await?
                .to_lowercase();
            if contains_any(&content, &self.markers.rate_limit) {
                self.bump_metrics(BrowserMetrics::record_rate_limit);
                let delay = self.retry.delay_for_attempt(0);
                warn!(delay_ms = delay.as_millis() as u64, "rate limit notice while scrolling");
                if !self.cancel.sleep(delay).await {
                    return Ok(ScrollStep::Cancelled);
                }
                self.bounded(self.page_timeout, "reload", page.reload())
                    .await?;
                return Ok(ScrollStep::Reloaded);
            }
        }
        Ok(ScrollStep::Continue)
    }

    async fn bounded<T, F>(&self, limit: Duration, what: &str, operation: F) -> BrowserResult<T>
    where
        F: Future<Output = BrowserResult<T>>,
    {
        match timeout(limit, operation).await {
            Ok(result) => result,
            Err(_) => Err(BrowserError::Timeout(what.to_string())),
        }
    }

    fn bump_metrics(&self, f: impl FnOnce(&mut BrowserMetrics)) {
        if let Ok(mut guard) = self.metrics.lock() {
            f(&mut guard);
        }
    }

    fn record_failure(
        &self,
        handle: &str,
        url: &str,
        error: &BrowserError,
        attempt: u32,
        action: RemediationAction,
    ) {
        if let Some(telemetry) = self.telemetry.as_ref() {
            if let Err(err) = telemetry_failure(telemetry, handle, url, error, attempt + 1, action) {
                warn!(error = %err, "failed to record navigation failure");
            }
        }
    }
}

fn contains_any(content_lower: &str, markers: &[String]) -> bool {
    markers
        .iter()
        .map(|marker| marker.trim().to_lowercase())
        .any(|marker| !marker.is_empty() && content_lower.contains(&marker))
}
