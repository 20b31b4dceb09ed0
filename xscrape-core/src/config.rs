use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::browser::longest_backoff_ms;
use crate::error::{ConfigError, Result};
use crate::timeline::{normalize_handle, Field};

pub const DEFAULT_BASE_URL: &str = "https://x.com";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Everything one scrape run needs. Every section falls back to its
/// defaults, so a config file only has to name what it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ScraperConfig {
    pub accounts: Vec<String>,
    pub posts_per_account: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_cutoff_days: Option<u32>,
    pub output_dir: PathBuf,
    pub base_url: String,
    pub browser: BrowserSection,
    pub retry: RetrySection,
    pub scroll: ScrollSection,
    pub timeouts: TimeoutSection,
    pub session: SessionSection,
    pub markers: MarkerSection,
    pub observability: ObservabilitySection,
    pub logging: LoggingSection,
    /// Per-field selector chains that replace the built-in ones.
    pub selectors: BTreeMap<Field, Vec<String>>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            accounts: Vec::new(),
            posts_per_account: 20,
            date_cutoff_days: None,
            output_dir: PathBuf::from("./data"),
            base_url: DEFAULT_BASE_URL.to_string(),
            browser: BrowserSection::default(),
            retry: RetrySection::default(),
            scroll: ScrollSection::default(),
            timeouts: TimeoutSection::default(),
            session: SessionSection::default(),
            markers: MarkerSection::default(),
            observability: ObservabilitySection::default(),
            logging: LoggingSection::default(),
            selectors: BTreeMap::new(),
        }
    }
}

impl ScraperConfig {
    /// Normalizes account handles and rejects values the scrape loop
    /// cannot work with.
    pub fn validated(mut self) -> Result<Self> {
        let mut handles: Vec<String> = Vec::with_capacity(self.accounts.len());
        for raw in &self.accounts {
            let handle = normalize_handle(raw);
            if handle.is_empty() || handles.contains(&handle) {
                continue;
            }
            handles.push(handle);
        }
        self.accounts = handles;

        if self.posts_per_account == 0 {
            return Err(invalid("posts_per_account must be at least 1"));
        }
        if self.base_url.trim().is_empty() {
            return Err(invalid("base_url must not be empty"));
        }
        self.base_url = self.base_url.trim_end_matches('/').to_string();
        if self.retry.max_retries == 0 {
            return Err(invalid("retry.max_retries must be at least 1"));
        }
        if self.retry.retry_delay_ms == 0 {
            return Err(invalid("retry.retry_delay_ms must be greater than zero"));
        }
        match longest_backoff_ms(&self.retry) {
            Some(longest) if longest <= self.retry.max_delay_ms => {}
            _ => {
                return Err(invalid(&format!(
                    "retry.max_delay_ms must cover retry_delay_ms * 2^(max_retries - 2) for {} retries",
                    self.retry.max_retries
                )))
            }
        }
        check_range("scroll.amount_px", self.scroll.amount_px[0] as u64, self.scroll.amount_px[1] as u64)?;
        check_range("scroll.delay_ms", self.scroll.delay_ms[0], self.scroll.delay_ms[1])?;
        check_range(
            "scroll.settle_delay_ms",
            self.scroll.settle_delay_ms[0],
            self.scroll.settle_delay_ms[1],
        )?;
        check_range(
            "scroll.account_delay_ms",
            self.scroll.account_delay_ms[0],
            self.scroll.account_delay_ms[1],
        )?;
        if !(0.0..=1.0).contains(&self.scroll.rate_limit_check_probability) {
            return Err(invalid(
                "scroll.rate_limit_check_probability must be between 0 and 1",
            ));
        }
        if self.timeouts.page_ms == 0 || self.timeouts.element_ms == 0 || self.timeouts.attribute_ms == 0 {
            return Err(invalid("timeouts must be greater than zero"));
        }
        if self.browser.viewport[0] == 0 || self.browser.viewport[1] == 0 {
            return Err(invalid("browser.viewport must be non-zero"));
        }
        for (field, chain) in &self.selectors {
            if chain.iter().all(|selector| selector.trim().is_empty()) {
                return Err(invalid(&format!("selectors.{field} has no usable selector")));
            }
        }
        Ok(self)
    }

    /// Posts older than the returned instant end an account's scrape.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.date_cutoff_days
            .map(|days| now - ChronoDuration::days(i64::from(days)))
    }

    pub fn user_agent(&self) -> &str {
        self.browser
            .user_agent
            .as_deref()
            .unwrap_or(DEFAULT_USER_AGENT)
    }

    pub fn sample() -> Self {
        Self {
            accounts: vec!["nasa".into(), "@rustlang".into()],
            posts_per_account: 25,
            date_cutoff_days: Some(30),
            logging: LoggingSection {
                level: "info".into(),
                file: Some(PathBuf::from("./logs/scraper.log")),
            },
            ..Self::default()
        }
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    pub headless: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable_path: Option<PathBuf>,
    pub sandbox: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub viewport: [u32; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    pub disable_automation_controlled: bool,
    pub extra_args: Vec<String>,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            headless: false,
            executable_path: None,
            sandbox: true,
            user_agent: None,
            viewport: [1280, 900],
            lang: None,
            disable_automation_controlled: true,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 2_000,
            max_delay_ms: 120_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollSection {
    pub amount_px: [u32; 2],
    pub delay_ms: [u64; 2],
    pub settle_delay_ms: [u64; 2],
    pub account_delay_ms: [u64; 2],
    pub rate_limit_check_probability: f64,
}

impl Default for ScrollSection {
    fn default() -> Self {
        Self {
            amount_px: [400, 800],
            delay_ms: [1_500, 3_000],
            settle_delay_ms: [1_500, 2_500],
            account_delay_ms: [2_000, 4_000],
            rate_limit_check_probability: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSection {
    pub page_ms: u64,
    pub element_ms: u64,
    pub attribute_ms: u64,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            page_ms: 30_000,
            element_ms: 10_000,
            attribute_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_state: Option<PathBuf>,
}

/// Page-text phrases that identify terminal or throttled profile states.
/// Matching is case-insensitive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerSection {
    pub not_found: Vec<String>,
    pub suspended: Vec<String>,
    pub rate_limit: Vec<String>,
}

impl Default for MarkerSection {
    fn default() -> Self {
        Self {
            not_found: vec!["This account doesn't exist".into()],
            suspended: vec!["Account suspended".into()],
            rate_limit: vec![
                "Rate limit exceeded".into(),
                "Something went wrong".into(),
                "Try again".into(),
                "too many requests".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilitySection {
    pub failure_log: PathBuf,
    pub metrics_db: PathBuf,
}

impl Default for ObservabilitySection {
    fn default() -> Self {
        Self {
            failure_log: PathBuf::from("./logs/failures.log"),
            metrics_db: PathBuf::from("./data/metrics.sqlite"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: None,
        }
    }
}

/// Loads a config from TOML, or from JSON when the file ends in `.json`.
pub fn load_scraper_config<P: AsRef<Path>>(path: P) -> Result<ScraperConfig> {
    let path = path.as_ref();
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let config: ScraperConfig = if is_json {
        load_json(path)?
    } else {
        load_toml(path)?
    };
    config.validated()
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = read(path)?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

fn load_json<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = read(path)?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Json {
        source,
        path: path.to_path_buf(),
    })
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })
}

fn check_range(name: &str, min: u64, max: u64) -> Result<()> {
    if min > max {
        return Err(invalid(&format!("{name} lower bound {min} exceeds upper bound {max}")));
    }
    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}
