#![allow(dead_code)]

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use xscrape_core::browser::{BrowserError, BrowserResult, DomContainer, ProfilePage, ScrollPacer};
use xscrape_core::timeline::AccountScraper;
use xscrape_core::ScraperConfig;

pub const ARTICLE: &str = r#"article[data-testid="tweet"]"#;
const PERMALINK: &str = r#"a[href*="/status/"]:has(time)"#;
const TIMESTAMP: &str = "time[datetime]";
const TEXT: &str = r#"[data-testid="tweetText"]"#;

#[derive(Debug, Clone, Default)]
pub struct SyntheticPost {
    pub id: String,
    pub handle: String,
    pub text: String,
    pub timestamp: Option<String>,
}

impl SyntheticPost {
    pub fn new(handle: &str, id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            text: format!("post {id}"),
            id,
            handle: handle.to_string(),
            timestamp: None,
        }
    }

    pub fn at(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }
}

/// How one profile URL behaves.
#[derive(Debug, Clone)]
pub struct ProfileScript {
    pub content: String,
    pub posts: Vec<SyntheticPost>,
    pub page_size: usize,
    pub timeouts_before_load: u32,
    pub rate_limited_loads: u32,
    /// 1-based `content()` call that shows a rate-limit notice.
    pub rate_limited_read: Option<usize>,
    /// Scroll calls that never complete.
    pub scroll_hangs: u32,
    pub fatal: bool,
    pub panics: bool,
    content_reads: usize,
}

impl ProfileScript {
    pub fn timeline(posts: Vec<SyntheticPost>, page_size: usize) -> Self {
        Self {
            content: "<main>timeline</main>".into(),
            posts,
            page_size,
            timeouts_before_load: 0,
            rate_limited_loads: 0,
            rate_limited_read: None,
            scroll_hangs: 0,
            fatal: false,
            panics: false,
            content_reads: 0,
        }
    }

    pub fn with_content(content: &str) -> Self {
        Self {
            content: content.into(),
            ..Self::timeline(Vec::new(), 0)
        }
    }

    /// `count` posts with ids `first_id`, `first_id + 1`, ...
    pub fn numbered(handle: &str, first_id: u64, count: usize, page_size: usize) -> Self {
        let posts = (0..count as u64)
            .map(|offset| SyntheticPost::new(handle, (first_id + offset).to_string()))
            .collect();
        Self::timeline(posts, page_size)
    }
}

/// In-memory stand-in for a timeline page. Scrolling reveals `page_size`
/// more posts; containers already shown stay visible.
#[derive(Debug, Default)]
pub struct MockTimeline {
    pub profiles: HashMap<String, ProfileScript>,
    pub navigations: Vec<(String, Instant)>,
    pub scrolls: usize,
    pub reloads: usize,
    current: Option<String>,
    visible: usize,
}

impl MockTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, handle: &str, script: ProfileScript) -> Self {
        self.profiles
            .insert(format!("https://x.com/{handle}"), script);
        self
    }

    fn script(&mut self) -> Option<&mut ProfileScript> {
        let url = self.current.clone()?;
        self.profiles.get_mut(&url)
    }

    pub fn navigation_gaps(&self) -> Vec<Duration> {
        self.navigations
            .windows(2)
            .map(|pair| pair[1].1 - pair[0].1)
            .collect()
    }
}

#[async_trait(?Send)]
impl ProfilePage for MockTimeline {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        self.navigations.push((url.to_string(), Instant::now()));
        self.current = None;
        let Some(script) = self.profiles.get_mut(url) else {
            self.current = Some(url.to_string());
            return Ok(());
        };
        if script.panics {
            panic!("renderer crashed while opening {url}");
        }
        if script.fatal {
            return Err(BrowserError::Unexpected("net::ERR_NAME_NOT_RESOLVED".into()));
        }
        if script.timeouts_before_load > 0 {
            script.timeouts_before_load -= 1;
            return Err(BrowserError::Timeout(format!("navigation to {url}")));
        }
        self.visible = script.page_size;
        self.current = Some(url.to_string());
        Ok(())
    }

    async fn reload(&mut self) -> BrowserResult<()> {
        self.reloads += 1;
        self.visible = self.script().map(|script| script.page_size).unwrap_or(0);
        Ok(())
    }

    async fn content(&mut self) -> BrowserResult<String> {
        if let Some(script) = self.script() {
            script.content_reads += 1;
        }
        match self.script() {
            Some(script) if script.rate_limited_read == Some(script.content_reads) => {
                Ok("<div>Rate limit exceeded</div>".into())
            }
            Some(script) if script.rate_limited_loads > 0 => {
                script.rate_limited_loads -= 1;
                Ok("<div>Rate limit exceeded</div>".into())
            }
            Some(script) => Ok(script.content.clone()),
            None => Ok("<main>This account doesn't exist</main>".into()),
        }
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        _timeout: Duration,
    ) -> BrowserResult<bool> {
        Ok(selector == ARTICLE
            && self
                .script()
                .map(|script| !script.posts.is_empty())
                .unwrap_or(false))
    }

    async fn containers(&mut self, selector: &str) -> BrowserResult<Vec<Box<dyn DomContainer>>> {
        if selector != ARTICLE {
            return Ok(Vec::new());
        }
        let visible = self.visible;
        let Some(script) = self.script() else {
            return Ok(Vec::new());
        };
        Ok(script
            .posts
            .iter()
            .take(visible)
            .cloned()
            .map(|post| Box::new(MockCard(post)) as Box<dyn DomContainer>)
            .collect())
    }

    async fn scroll_by(&mut self, _delta_y: i64) -> BrowserResult<()> {
        self.scrolls += 1;
        let hang = match self.script() {
            Some(script) if script.scroll_hangs > 0 => {
                script.scroll_hangs -= 1;
                true
            }
            _ => false,
        };
        if hang {
            std::future::pending::<()>().await;
        }
        let page_size = self.script().map(|script| script.page_size).unwrap_or(0);
        self.visible += page_size;
        Ok(())
    }
}

pub struct MockCard(pub SyntheticPost);

#[async_trait(?Send)]
impl DomContainer for MockCard {
    async fn count(&self, selector: &str) -> BrowserResult<usize> {
        let hit = match selector {
            PERMALINK => !self.0.id.is_empty(),
            TIMESTAMP => self.0.timestamp.is_some(),
            TEXT => !self.0.text.is_empty(),
            _ => false,
        };
        Ok(usize::from(hit))
    }

    async fn text(&self, selector: &str) -> BrowserResult<Option<String>> {
        Ok((selector == TEXT).then(|| self.0.text.clone()))
    }

    async fn attribute(&self, selector: &str, name: &str) -> BrowserResult<Option<String>> {
        Ok(match (selector, name) {
            (PERMALINK, "href") if !self.0.id.is_empty() => {
                Some(format!("/{}/status/{}", self.0.handle, self.0.id))
            }
            (TIMESTAMP, "datetime") => self.0.timestamp.clone(),
            _ => None,
        })
    }

    async fn attributes(&self, selector: &str, name: &str) -> BrowserResult<Vec<String>> {
        Ok(self.attribute(selector, name).await?.into_iter().collect())
    }
}

pub fn test_config() -> ScraperConfig {
    let mut config = ScraperConfig::default();
    config.retry.max_retries = 3;
    config.retry.retry_delay_ms = 1_000;
    config.retry.max_delay_ms = 60_000;
    config.scroll.rate_limit_check_probability = 0.0;
    config.timeouts.page_ms = 5_000;
    config.timeouts.element_ms = 1_000;
    config.validated().expect("test config is valid")
}

pub fn scraper(config: &ScraperConfig) -> AccountScraper {
    AccountScraper::from_config(config)
        .with_pacer(ScrollPacer::with_seed(config.scroll.clone(), 42))
}
