use serde::{Deserialize, Serialize};

/// One post as captured from a timeline container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    pub account_handle: String,
    pub account_display_name: String,
    pub post_url: String,
    pub post_id: String,
    pub timestamp: Option<String>,
    pub text_content: String,
    pub reply_count: u64,
    pub repost_count: u64,
    pub like_count: u64,
    pub view_count: u64,
    pub is_repost: bool,
    pub is_quote: bool,
    pub media_urls: Vec<String>,
    pub scraped_at: String,
}

impl PostRecord {
    /// A record needs at least an id or some text to be worth keeping.
    pub fn is_viable(&self) -> bool {
        !self.post_id.trim().is_empty() || !self.text_content.trim().is_empty()
    }

    pub fn csv_header() -> [&'static str; 14] {
        [
            "account_handle",
            "account_display_name",
            "post_url",
            "post_id",
            "timestamp",
            "text_content",
            "reply_count",
            "repost_count",
            "like_count",
            "view_count",
            "is_repost",
            "is_quote",
            "media_urls",
            "scraped_at",
        ]
    }

    pub fn csv_row(&self) -> [String; 14] {
        [
            self.account_handle.clone(),
            self.account_display_name.clone(),
            self.post_url.clone(),
            self.post_id.clone(),
            self.timestamp.clone().unwrap_or_default(),
            self.text_content.clone(),
            self.reply_count.to_string(),
            self.repost_count.to_string(),
            self.like_count.to_string(),
            self.view_count.to_string(),
            self.is_repost.to_string(),
            self.is_quote.to_string(),
            self.media_urls.join("; "),
            self.scraped_at.clone(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viability_requires_id_or_text() {
        let mut record = PostRecord::default();
        assert!(!record.is_viable());
        record.text_content = "   ".into();
        assert!(!record.is_viable());
        record.text_content = "hello".into();
        assert!(record.is_viable());
        let only_id = PostRecord {
            post_id: "42".into(),
            ..PostRecord::default()
        };
        assert!(only_id.is_viable());
    }

    #[test]
    fn csv_row_joins_media_and_blanks_missing_timestamp() {
        let record = PostRecord {
            post_id: "1".into(),
            media_urls: vec!["a".into(), "b".into()],
            ..PostRecord::default()
        };
        let row = record.csv_row();
        assert_eq!(row[4], "");
        assert_eq!(row[12], "a; b");
        assert_eq!(row.len(), PostRecord::csv_header().len());
    }
}
