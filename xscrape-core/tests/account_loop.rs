mod support;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::watch;

use support::{scraper, test_config, MockTimeline, ProfileScript, SyntheticPost};
use xscrape_core::browser::{BrowserMetrics, CancelSignal};
use xscrape_core::timeline::{TerminalReason, MAX_EMPTY_PASSES};

fn ids(posts: &[xscrape_core::PostRecord]) -> Vec<String> {
    posts.iter().map(|post| post.post_id.clone()).collect()
}

#[tokio::test(start_paused = true)]
async fn collects_until_limit_without_duplicates() {
    let config = test_config();
    let mut page =
        MockTimeline::new().with_profile("foo", ProfileScript::numbered("foo", 1000, 30, 8));
    let mut seen = HashSet::new();

    let outcome = scraper(&config)
        .scrape(&mut page, "foo", None, &mut seen)
        .await;

    assert_eq!(outcome.reason, TerminalReason::LimitReached);
    assert_eq!(outcome.posts.len(), config.posts_per_account);
    let expected: Vec<String> = (1000..1020).map(|id| id.to_string()).collect();
    assert_eq!(ids(&outcome.posts), expected);
    assert_eq!(seen.len(), 20);
    assert!(outcome.posts.iter().all(|post| post.account_handle == "foo"));
    assert_eq!(
        outcome.posts[0].post_url,
        "https://x.com/foo/status/1000"
    );
    // 8 visible, then 16, then 24 -> two scrolls before the limit
    assert_eq!(page.scrolls, 2);
}

#[tokio::test(start_paused = true)]
async fn posts_seen_earlier_in_the_run_are_skipped() {
    let config = test_config();
    let mut page =
        MockTimeline::new().with_profile("foo", ProfileScript::numbered("foo", 1, 6, 6));
    let mut seen: HashSet<String> = ["2", "4"].iter().map(|id| id.to_string()).collect();

    let mut scraper = scraper(&config);
    let outcome = scraper.scrape(&mut page, "foo", None, &mut seen).await;

    assert_eq!(ids(&outcome.posts), vec!["1", "3", "5", "6"]);
    assert_eq!(outcome.reason, TerminalReason::Stagnated);
    assert_eq!(seen.len(), 6);
    assert!(scraper.metrics().duplicates_skipped >= 2);
}

#[tokio::test(start_paused = true)]
async fn cutoff_stops_at_first_older_post() {
    let config = test_config();
    let now = Utc::now();
    let cutoff = now - ChronoDuration::days(1);
    let posts = (0..10)
        .map(|index| {
            let posted = now - ChronoDuration::hours(5 * index);
            SyntheticPost::new("foo", (500 - index).to_string()).at(posted.to_rfc3339())
        })
        .collect();
    let mut page =
        MockTimeline::new().with_profile("foo", ProfileScript::timeline(posts, 3));
    let mut seen = HashSet::new();

    let outcome = scraper(&config)
        .scrape(&mut page, "foo", Some(cutoff), &mut seen)
        .await;

    assert_eq!(outcome.reason, TerminalReason::CutoffReached);
    assert_eq!(ids(&outcome.posts), vec!["500", "499", "498", "497", "496"]);
    assert!(!seen.contains("495"));
}

#[tokio::test(start_paused = true)]
async fn unusable_containers_are_dropped() {
    let config = test_config();
    let posts = vec![
        SyntheticPost::new("foo", "1"),
        SyntheticPost {
            handle: "foo".into(),
            ..SyntheticPost::default()
        },
        SyntheticPost {
            handle: "foo".into(),
            text: "text but no permalink".into(),
            ..SyntheticPost::default()
        },
        SyntheticPost::new("foo", "2"),
    ];
    let mut page = MockTimeline::new().with_profile("foo", ProfileScript::timeline(posts, 4));
    let mut seen = HashSet::new();

    let mut scraper = scraper(&config);
    let outcome = scraper.scrape(&mut page, "foo", None, &mut seen).await;

    assert_eq!(ids(&outcome.posts), vec!["1", "2"]);
    assert!(scraper.metrics().extraction_rejects >= 2);
}

#[tokio::test(start_paused = true)]
async fn stagnant_timeline_terminates() {
    let config = test_config();
    let mut page =
        MockTimeline::new().with_profile("foo", ProfileScript::numbered("foo", 10, 3, 10));
    let mut seen = HashSet::new();

    let outcome = scraper(&config)
        .scrape(&mut page, "foo", None, &mut seen)
        .await;

    assert_eq!(outcome.reason, TerminalReason::Stagnated);
    assert_eq!(outcome.posts.len(), 3);
    assert_eq!(outcome.scroll_passes, MAX_EMPTY_PASSES);
    assert_eq!(page.scrolls, MAX_EMPTY_PASSES as usize);
}

#[tokio::test(start_paused = true)]
async fn repeated_timeouts_back_off_then_fail() {
    let config = test_config();
    let mut script = ProfileScript::numbered("foo", 1, 5, 5);
    script.timeouts_before_load = u32::MAX;
    let mut page = MockTimeline::new().with_profile("foo", script);
    let mut seen = HashSet::new();

    let outcome = scraper(&config)
        .scrape(&mut page, "foo", None, &mut seen)
        .await;

    assert!(outcome.reason.is_error(), "got {:?}", outcome.reason);
    assert!(outcome.posts.is_empty());
    assert_eq!(outcome.attempts, config.retry.max_retries);
    assert_eq!(page.navigations.len(), config.retry.max_retries as usize);

    let gaps = page.navigation_gaps();
    assert_eq!(gaps.len(), 2);
    assert!(gaps.windows(2).all(|pair| pair[1] > pair[0]), "gaps {gaps:?}");
    assert!(gaps[0] >= Duration::from_millis(1_000));
    assert!(gaps[1] >= Duration::from_millis(2_000));
}

#[tokio::test(start_paused = true)]
async fn recovers_after_a_timeout() {
    let config = test_config();
    let mut script = ProfileScript::numbered("foo", 1, 3, 3);
    script.timeouts_before_load = 1;
    let mut page = MockTimeline::new().with_profile("foo", script);
    let mut seen = HashSet::new();

    let outcome = scraper(&config)
        .scrape(&mut page, "foo", None, &mut seen)
        .await;

    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.posts.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_notice_backs_off_and_reloads() {
    let config = test_config();
    let mut script = ProfileScript::numbered("foo", 1, 3, 3);
    script.rate_limited_loads = 1;
    let mut page = MockTimeline::new().with_profile("foo", script);
    let mut seen = HashSet::new();

    let mut scraper = scraper(&config);
    let outcome = scraper.scrape(&mut page, "foo", None, &mut seen).await;

    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.posts.len(), 3);
    assert_eq!(scraper.metrics().rate_limit_hits, 1);
}

#[tokio::test(start_paused = true)]
async fn stalled_scroll_reloads_and_keeps_collected_posts() {
    let config = test_config();
    let mut script = ProfileScript::numbered("foo", 1, 30, 5);
    script.scroll_hangs = 1;
    let mut page = MockTimeline::new().with_profile("foo", script);
    let mut seen = HashSet::new();

    let outcome = scraper(&config)
        .scrape(&mut page, "foo", None, &mut seen)
        .await;

    assert_eq!(outcome.reason, TerminalReason::LimitReached);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(page.navigations.len(), 2);
    let expected: Vec<String> = (1..=20).map(|id| id.to_string()).collect();
    assert_eq!(ids(&outcome.posts), expected);
}

#[tokio::test(start_paused = true)]
async fn scroll_that_never_recovers_fails_with_partial_posts() {
    let config = test_config();
    let mut script = ProfileScript::numbered("foo", 1, 30, 5);
    script.scroll_hangs = u32::MAX;
    let mut page = MockTimeline::new().with_profile("foo", script);
    let mut seen = HashSet::new();

    let outcome = scraper(&config)
        .scrape(&mut page, "foo", None, &mut seen)
        .await;

    assert!(outcome.reason.is_error(), "got {:?}", outcome.reason);
    assert_eq!(outcome.attempts, config.retry.max_retries);
    assert_eq!(page.navigations.len(), config.retry.max_retries as usize);
    assert_eq!(ids(&outcome.posts), vec!["1", "2", "3", "4", "5"]);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_while_scrolling_reloads_and_continues() {
    let mut config = test_config();
    config.posts_per_account = 12;
    config.scroll.rate_limit_check_probability = 1.0;
    let mut script = ProfileScript::numbered("foo", 1, 12, 4);
    // first read is the load check, second is the check after the first scroll
    script.rate_limited_read = Some(2);
    let mut page = MockTimeline::new().with_profile("foo", script);
    let mut seen = HashSet::new();

    let mut scraper = scraper(&config);
    let outcome = scraper.scrape(&mut page, "foo", None, &mut seen).await;

    assert_eq!(page.reloads, 1);
    assert_eq!(page.navigations.len(), 1);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.reason, TerminalReason::LimitReached);
    assert_eq!(outcome.posts.len(), 12);
    assert_eq!(scraper.metrics().rate_limit_hits, 1);
}

#[tokio::test(start_paused = true)]
async fn shared_metrics_receive_loop_counters() {
    let config = test_config();
    let shared = Arc::new(Mutex::new(BrowserMetrics::default()));
    let mut page =
        MockTimeline::new().with_profile("foo", ProfileScript::numbered("foo", 1, 3, 3));
    let mut seen: HashSet<String> = ["2".to_string()].into_iter().collect();

    let mut scraper = scraper(&config).with_metrics(Arc::clone(&shared));
    let outcome = scraper.scrape(&mut page, "foo", None, &mut seen).await;

    assert_eq!(ids(&outcome.posts), vec!["1", "3"]);
    let metrics = shared.lock().unwrap().clone();
    assert_eq!(metrics.posts_accepted, 2);
    assert!(metrics.duplicates_skipped >= 1);
    assert_eq!(metrics.scroll_passes, u64::from(MAX_EMPTY_PASSES));
    assert_eq!(scraper.metrics().posts_accepted, 2);
}

#[tokio::test(start_paused = true)]
async fn missing_and_suspended_accounts_are_not_errors() {
    let config = test_config();
    let mut page = MockTimeline::new().with_profile(
        "banned",
        ProfileScript::with_content("<span>Account suspended</span>"),
    );
    let mut seen = HashSet::new();
    let mut scraper = scraper(&config);

    let missing = scraper.scrape(&mut page, "nobody", None, &mut seen).await;
    assert_eq!(missing.reason, TerminalReason::NotFound);
    assert!(missing.posts.is_empty());
    assert_eq!(missing.attempts, 1);

    let suspended = scraper.scrape(&mut page, "banned", None, &mut seen).await;
    assert_eq!(suspended.reason, TerminalReason::Suspended);
    assert_eq!(page.navigations.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn fatal_navigation_error_is_not_retried() {
    let config = test_config();
    let mut script = ProfileScript::numbered("foo", 1, 3, 3);
    script.fatal = true;
    let mut page = MockTimeline::new().with_profile("foo", script);
    let mut seen = HashSet::new();

    let outcome = scraper(&config)
        .scrape(&mut page, "foo", None, &mut seen)
        .await;

    assert!(outcome.reason.is_error());
    assert_eq!(page.navigations.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_run_does_not_navigate() {
    let config = test_config();
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();
    let mut page =
        MockTimeline::new().with_profile("foo", ProfileScript::numbered("foo", 1, 3, 3));
    let mut seen = HashSet::new();

    let outcome = scraper(&config)
        .with_cancel(CancelSignal::new(rx))
        .scrape(&mut page, "foo", None, &mut seen)
        .await;

    assert_eq!(outcome.reason, TerminalReason::Cancelled);
    assert!(page.navigations.is_empty());
}
