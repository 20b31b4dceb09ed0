use chrono::Utc;
use regex::Regex;
use tracing::debug;

use crate::browser::DomContainer;

use super::extract::FieldExtractor;
use super::handle::canonical_post_url;
use super::post::PostRecord;
use super::selectors::Field;

/// Turns one timeline container into a `PostRecord`, or nothing when the
/// container carries neither an ID nor text.
#[derive(Debug, Clone)]
pub struct PostAssembler {
    extractor: FieldExtractor,
    base_url: String,
    status_path: Regex,
}

impl PostAssembler {
    pub fn new(extractor: FieldExtractor, base_url: impl Into<String>) -> Self {
        Self {
            extractor,
            base_url: base_url.into(),
            status_path: Regex::new(r"/([^/?#]+)/status/(\d+)").expect("valid status regex"),
        }
    }

    pub fn extractor(&self) -> &FieldExtractor {
        &self.extractor
    }

    pub async fn assemble(
        &self,
        container: &dyn DomContainer,
        target_handle: &str,
    ) -> Option<PostRecord> {
        let extractor = &self.extractor;
        let mut post = PostRecord {
            scraped_at: Utc::now().to_rfc3339(),
            timestamp: extractor.timestamp(container).await,
            ..PostRecord::default()
        };

        let href = extractor
            .attribute(container, Field::Permalink, "href")
            .await;
        if !href.is_empty() {
            post.post_url = canonical_post_url(&href, &self.base_url);
            if let Some(captures) = self.status_path.captures(&post.post_url) {
                post.account_handle = captures[1].to_string();
                post.post_id = captures[2].to_string();
            }
        }
        if post.account_handle.is_empty() {
            post.account_handle = target_handle.to_string();
        }

        post.account_display_name = extractor.text(container, Field::DisplayName).await;
        post.text_content = extractor.text(container, Field::TweetText).await;
        post.reply_count = extractor.count(container, Field::ReplyCount).await;
        post.repost_count = extractor.count(container, Field::RepostCount).await;
        post.like_count = extractor.count(container, Field::LikeCount).await;
        post.view_count = extractor.count(container, Field::ViewCount).await;
        post.is_repost = extractor
            .text(container, Field::RepostIndicator)
            .await
            .to_lowercase()
            .contains("repost");
        post.is_quote = extractor.present(container, Field::QuoteIndicator).await;
        post.media_urls = extractor.media_urls(container).await;

        if !post.is_viable() {
            debug!(target_handle, "skipping container with no id and no text");
            return None;
        }
        Some(post)
    }
}
