use std::future::Future;
use std::time::Duration;

use chrono::DateTime;
use tokio::time::timeout;
use tracing::trace;
use url::Url;

use crate::browser::{BrowserResult, DomContainer};

use super::selectors::{Field, SelectorTable};

const IMAGE_HOST: &str = "pbs.twimg.com";
const IMAGE_VARIANT: &str = "format=jpg&name=large";

/// A field whose selectors all missed, or whose read failed or timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NotFound;

/// Resolves logical fields against a post container through ordered
/// selector chains. Every accessor collapses a miss to the type's default.
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    selectors: SelectorTable,
    read_timeout: Duration,
}

impl FieldExtractor {
    pub fn new(selectors: SelectorTable, read_timeout: Duration) -> Self {
        Self {
            selectors,
            read_timeout,
        }
    }

    pub fn selectors(&self) -> &SelectorTable {
        &self.selectors
    }

    /// First selector in the chain that matches at least one element.
    pub(crate) async fn resolve(
        &self,
        container: &dyn DomContainer,
        field: Field,
    ) -> Result<&str, NotFound> {
        for selector in self.selectors.chain(field) {
            match self.bounded(container.count(selector)).await {
                Ok(count) if count > 0 => return Ok(selector.as_str()),
                Ok(_) => continue,
                Err(NotFound) => {
                    trace!(field = %field, selector = %selector, "selector failed");
                    continue;
                }
            }
        }
        Err(NotFound)
    }

    pub async fn text(&self, container: &dyn DomContainer, field: Field) -> String {
        self.try_text(container, field).await.unwrap_or_default()
    }

    pub async fn attribute(&self, container: &dyn DomContainer, field: Field, name: &str) -> String {
        self.try_attribute(container, field, name)
            .await
            .unwrap_or_default()
    }

    pub async fn count(&self, container: &dyn DomContainer, field: Field) -> u64 {
        parse_count(&self.text(container, field).await)
    }

    pub async fn present(&self, container: &dyn DomContainer, field: Field) -> bool {
        self.resolve(container, field).await.is_ok()
    }

    /// The machine-readable `datetime` attribute, kept only when it parses.
    pub async fn timestamp(&self, container: &dyn DomContainer) -> Option<String> {
        let raw = self.attribute(container, Field::Timestamp, "datetime").await;
        parse_timestamp(&raw).map(|_| raw)
    }

    /// Image and video URLs in document order, deduplicated. Unlike scalar
    /// fields, every selector in the media chains contributes.
    pub async fn media_urls(&self, container: &dyn DomContainer) -> Vec<String> {
        let mut urls = Vec::new();
        for selector in self.selectors.chain(Field::MediaImages) {
            let sources = self
                .bounded(container.attributes(selector, "src"))
                .await
                .unwrap_or_default();
            for src in sources {
                if let Some(url) = normalize_image_url(&src) {
                    push_unique(&mut urls, url);
                }
            }
        }
        for selector in self.selectors.chain(Field::MediaVideos) {
            for attribute in ["src", "poster"] {
                let sources = self
                    .bounded(container.attributes(selector, attribute))
                    .await
                    .unwrap_or_default();
                for src in sources {
                    let src = src.trim();
                    if !src.is_empty() && !src.starts_with("blob:") {
                        push_unique(&mut urls, src.to_string());
                    }
                }
            }
        }
        urls
    }

    async fn try_text(&self, container: &dyn DomContainer, field: Field) -> Result<String, NotFound> {
        let selector = self.resolve(container, field).await?;
        let text = self.bounded(container.text(selector)).await?.ok_or(NotFound)?;
        Ok(text.trim().to_string())
    }

    async fn try_attribute(
        &self,
        container: &dyn DomContainer,
        field: Field,
        name: &str,
    ) -> Result<String, NotFound> {
        let selector = self.resolve(container, field).await?;
        let value = self
            .bounded(container.attribute(selector, name))
            .await?
            .ok_or(NotFound)?;
        Ok(value.trim().to_string())
    }

    async fn bounded<T, F>(&self, read: F) -> Result<T, NotFound>
    where
        F: Future<Output = BrowserResult<T>>,
    {
        match timeout(self.read_timeout, read).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) | Err(_) => Err(NotFound),
        }
    }
}

fn push_unique(urls: &mut Vec<String>, url: String) {
    if !urls.contains(&url) {
        urls.push(url);
    }
}

fn normalize_image_url(src: &str) -> Option<String> {
    let mut url = Url::parse(src.trim()).ok()?;
    if url.host_str() != Some(IMAGE_HOST) {
        return None;
    }
    url.set_query(Some(IMAGE_VARIANT));
    url.set_fragment(None);
    Some(url.to_string())
}

/// Parses abbreviated engagement counts such as `1.5K` or `2,345`.
/// Anything unparseable is zero.
pub fn parse_count(text: &str) -> u64 {
    let cleaned: String = text
        .chars()
        .filter(|ch| !ch.is_whitespace() && *ch != ',')
        .collect::<String>()
        .to_uppercase();
    if cleaned.is_empty() {
        return 0;
    }
    let (number, multiplier) = match cleaned.chars().last() {
        Some('K') => (&cleaned[..cleaned.len() - 1], 1e3),
        Some('M') => (&cleaned[..cleaned.len() - 1], 1e6),
        Some('B') => (&cleaned[..cleaned.len() - 1], 1e9),
        _ => (cleaned.as_str(), 1.0),
    };
    match number.parse::<f64>() {
        // the epsilon keeps 2.3K from truncating to 2299
        Ok(value) if value.is_finite() && value >= 0.0 => (value * multiplier + 1e-6) as u64,
        _ => 0,
    }
}

/// Absolute ISO-8601 timestamps with an offset. Relative strings ("2h")
/// are not understood.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<chrono::FixedOffset>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(raw).ok()
}
