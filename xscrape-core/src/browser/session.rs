use std::path::{Path, PathBuf};
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::network::{
    Cookie, CookieParam, CookieSameSite, TimeSinceEpoch,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ScraperConfig;

use super::error::{BrowserError, BrowserResult};
use super::page::ProfilePage;

pub const DEFAULT_SESSION_PATH: &str = "./.x_session/storage_state.json";
/// Present only on the signed-in home timeline.
pub const LOGGED_IN_MARKER: &str = r#"[data-testid="primaryColumn"]"#;

/// Saved browser state, in the same layout Playwright writes, so session
/// files can be shared between tools.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<StoredCookie>,
    #[serde(default)]
    pub origins: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    #[serde(default = "session_cookie_expiry")]
    pub expires: f64,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

fn session_cookie_expiry() -> f64 {
    -1.0
}

impl StoredCookie {
    pub fn to_param(&self) -> BrowserResult<CookieParam> {
        let mut builder = CookieParam::builder()
            .name(self.name.clone())
            .value(self.value.clone())
            .domain(self.domain.clone())
            .path(self.path.clone())
            .secure(self.secure)
            .http_only(self.http_only);
        if self.expires > 0.0 {
            builder = builder.expires(TimeSinceEpoch::new(self.expires));
        }
        if let Some(same_site) = self.same_site.as_deref().and_then(parse_same_site) {
            builder = builder.same_site(same_site);
        }
        builder.build().map_err(BrowserError::Session)
    }
}

impl From<&Cookie> for StoredCookie {
    fn from(cookie: &Cookie) -> Self {
        Self {
            name: cookie.name.clone(),
            value: cookie.value.clone(),
            domain: cookie.domain.clone(),
            path: cookie.path.clone(),
            expires: if cookie.session { -1.0 } else { cookie.expires },
            http_only: cookie.http_only,
            secure: cookie.secure,
            same_site: cookie.same_site.as_ref().map(same_site_name),
        }
    }
}

fn parse_same_site(value: &str) -> Option<CookieSameSite> {
    match value.to_ascii_lowercase().as_str() {
        "strict" => Some(CookieSameSite::Strict),
        "lax" => Some(CookieSameSite::Lax),
        "none" => Some(CookieSameSite::None),
        _ => None,
    }
}

fn same_site_name(value: &CookieSameSite) -> String {
    match value {
        CookieSameSite::Strict => "Strict",
        CookieSameSite::Lax => "Lax",
        CookieSameSite::None => "None",
    }
    .to_string()
}

/// What a new browser context is created with.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub storage_state: Option<PathBuf>,
    pub user_agent: String,
    pub viewport: [u32; 2],
}

pub trait SessionProvisioner {
    fn has_saved_state(&self) -> bool;
    fn context_options(&self, config: &ScraperConfig) -> ContextOptions;
    fn load_state(&self) -> BrowserResult<Option<StorageState>>;
    fn persist(&self, state: &StorageState) -> BrowserResult<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct FileSessionProvisioner {
    path: PathBuf,
}

impl FileSessionProvisioner {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path: path.unwrap_or_else(|| PathBuf::from(DEFAULT_SESSION_PATH)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionProvisioner for FileSessionProvisioner {
    fn has_saved_state(&self) -> bool {
        self.path.is_file()
    }

    fn context_options(&self, config: &ScraperConfig) -> ContextOptions {
        ContextOptions {
            storage_state: self.has_saved_state().then(|| self.path.clone()),
            user_agent: config.user_agent().to_string(),
            viewport: config.browser.viewport,
        }
    }

    fn load_state(&self) -> BrowserResult<Option<StorageState>> {
        if !self.has_saved_state() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)?;
        let state = serde_json::from_str(&raw).map_err(|err| {
            BrowserError::Session(format!("invalid state file {}: {err}", self.path.display()))
        })?;
        Ok(Some(state))
    }

    fn persist(&self, state: &StorageState) -> BrowserResult<PathBuf> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut state = state.clone();
        if state.origins.is_empty() {
            // chromium cannot export localStorage; keep what an earlier tool saved
            if let Ok(Some(previous)) = self.load_state() {
                state.origins = previous.origins;
            }
        }
        let json = serde_json::to_string_pretty(&state)
            .map_err(|err| BrowserError::Session(err.to_string()))?;
        std::fs::write(&self.path, json)?;
        info!(path = %self.path.display(), cookies = state.cookies.len(), "session state saved");
        Ok(self.path.clone())
    }
}

/// Loads `home_url` and reports whether the signed-in timeline appears.
pub async fn verify_logged_in(
    page: &mut dyn ProfilePage,
    home_url: &str,
    wait: Duration,
) -> BrowserResult<bool> {
    page.navigate(home_url).await?;
    let logged_in = page.wait_for_selector(LOGGED_IN_MARKER, wait).await?;
    if !logged_in {
        warn!(url = home_url, "signed-in marker not found");
    }
    Ok(logged_in)
}
