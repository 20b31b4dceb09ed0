pub mod browser;
pub mod config;
pub mod error;
pub mod timeline;

pub use config::{load_scraper_config, ScraperConfig};
pub use error::{ConfigError, Result};
pub use timeline::{
    AccountOutcome, AccountScraper, Orchestrator, PostRecord, RunReport, TerminalReason,
};
