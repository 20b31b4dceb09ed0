use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical pieces of a post that are located through selector chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    TweetArticle,
    TweetText,
    DisplayName,
    Timestamp,
    Permalink,
    ReplyCount,
    RepostCount,
    LikeCount,
    ViewCount,
    MediaImages,
    MediaVideos,
    RepostIndicator,
    QuoteIndicator,
}

impl Field {
    pub const ALL: [Field; 13] = [
        Field::TweetArticle,
        Field::TweetText,
        Field::DisplayName,
        Field::Timestamp,
        Field::Permalink,
        Field::ReplyCount,
        Field::RepostCount,
        Field::LikeCount,
        Field::ViewCount,
        Field::MediaImages,
        Field::MediaVideos,
        Field::RepostIndicator,
        Field::QuoteIndicator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::TweetArticle => "tweet_article",
            Field::TweetText => "tweet_text",
            Field::DisplayName => "display_name",
            Field::Timestamp => "timestamp",
            Field::Permalink => "permalink",
            Field::ReplyCount => "reply_count",
            Field::RepostCount => "repost_count",
            Field::LikeCount => "like_count",
            Field::ViewCount => "view_count",
            Field::MediaImages => "media_images",
            Field::MediaVideos => "media_videos",
            Field::RepostIndicator => "repost_indicator",
            Field::QuoteIndicator => "quote_indicator",
        }
    }

    fn default_chain(&self) -> &'static [&'static str] {
        match self {
            Field::TweetArticle => &[
                r#"article[data-testid="tweet"]"#,
                r#"article[role="article"]"#,
                r#"div[data-testid="cellInnerDiv"] article"#,
            ],
            Field::TweetText => &[
                r#"[data-testid="tweetText"]"#,
                "div[lang]",
                r#"article div[dir="auto"]"#,
            ],
            Field::DisplayName => &[
                r#"div[data-testid="User-Name"] span"#,
                r#"a[role="link"] span span"#,
            ],
            Field::Timestamp => &["time[datetime]", r#"a[href*="/status/"] time"#],
            Field::Permalink => &[
                r#"a[href*="/status/"]:has(time)"#,
                r#"a[href*="/status/"]"#,
            ],
            Field::ReplyCount => &[
                r#"[data-testid="reply"] span"#,
                r#"button[data-testid="reply"] span span"#,
                r#"[aria-label*="Repl"] span"#,
            ],
            Field::RepostCount => &[
                r#"[data-testid="retweet"] span"#,
                r#"button[data-testid="retweet"] span span"#,
                r#"[aria-label*="Repost"] span"#,
                r#"[aria-label*="retweet"] span"#,
            ],
            Field::LikeCount => &[
                r#"[data-testid="like"] span"#,
                r#"button[data-testid="like"] span span"#,
                r#"[aria-label*="Like"] span"#,
            ],
            Field::ViewCount => &[
                r#"a[href*="/analytics"] span"#,
                r#"[aria-label*="View"] span"#,
                r#"[aria-label*="view"] span"#,
            ],
            Field::MediaImages => &[
                r#"img[src*="pbs.twimg.com/media"]"#,
                r#"div[data-testid="tweetPhoto"] img"#,
                r#"img[alt="Image"]"#,
            ],
            Field::MediaVideos => &[
                "video source",
                "video[src]",
                r#"[data-testid="videoComponent"] video"#,
                "video[poster]",
            ],
            Field::RepostIndicator => &[r#"[data-testid="socialContext"]"#],
            Field::QuoteIndicator => &[
                r#"[data-testid="quoteTweet"]"#,
                r#"div[role="link"][tabindex="0"]"#,
            ],
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered selector chains per field, most specific first. The table is
/// plain data so that markup changes only require new selectors.
#[derive(Debug, Clone)]
pub struct SelectorTable {
    chains: BTreeMap<Field, Vec<String>>,
}

impl Default for SelectorTable {
    fn default() -> Self {
        let chains = Field::ALL
            .iter()
            .map(|field| {
                let chain = field
                    .default_chain()
                    .iter()
                    .map(|selector| selector.to_string())
                    .collect();
                (*field, chain)
            })
            .collect();
        Self { chains }
    }
}

impl SelectorTable {
    /// Built-in chains with whole-chain replacements applied.
    pub fn with_overrides(overrides: &BTreeMap<Field, Vec<String>>) -> Self {
        let mut table = Self::default();
        for (field, chain) in overrides {
            let chain: Vec<String> = chain
                .iter()
                .map(|selector| selector.trim().to_string())
                .filter(|selector| !selector.is_empty())
                .collect();
            if !chain.is_empty() {
                table.chains.insert(*field, chain);
            }
        }
        table
    }

    pub fn chain(&self, field: Field) -> &[String] {
        self.chains
            .get(&field)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}
