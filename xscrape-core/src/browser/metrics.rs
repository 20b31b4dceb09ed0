use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrowserMetrics {
    pub pages_opened: u64,
    pub navigations: u64,
    pub navigation_timeouts: u64,
    pub rate_limit_hits: u64,
    pub scroll_passes: u64,
    pub containers_seen: u64,
    pub posts_accepted: u64,
    pub duplicates_skipped: u64,
    pub extraction_rejects: u64,
}

impl BrowserMetrics {
    pub fn record_page_open(&mut self) {
        self.pages_opened = self.pages_opened.saturating_add(1);
    }

    pub fn record_navigation(&mut self) {
        self.navigations = self.navigations.saturating_add(1);
    }

    pub fn record_navigation_timeout(&mut self) {
        self.navigation_timeouts = self.navigation_timeouts.saturating_add(1);
    }

    pub fn record_rate_limit(&mut self) {
        self.rate_limit_hits = self.rate_limit_hits.saturating_add(1);
    }

    pub fn record_scroll(&mut self) {
        self.scroll_passes = self.scroll_passes.saturating_add(1);
    }

    pub fn record_containers(&mut self, count: u64) {
        self.containers_seen = self.containers_seen.saturating_add(count);
    }

    pub fn record_post_accepted(&mut self) {
        self.posts_accepted = self.posts_accepted.saturating_add(1);
    }

    pub fn record_duplicate(&mut self) {
        self.duplicates_skipped = self.duplicates_skipped.saturating_add(1);
    }

    pub fn record_extraction_reject(&mut self) {
        self.extraction_rejects = self.extraction_rejects.saturating_add(1);
    }

    /// Share of seen containers that became accepted posts, in percent.
    pub fn yield_rate(&self) -> f64 {
        if self.containers_seen == 0 {
            0.0
        } else {
            (self.posts_accepted as f64 / self.containers_seen as f64) * 100.0
        }
    }
}
