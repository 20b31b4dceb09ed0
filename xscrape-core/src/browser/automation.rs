use std::sync::{Arc, Mutex};
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ScraperConfig;

use super::error::{BrowserError, BrowserResult};
use super::metrics::BrowserMetrics;
use super::session::{ContextOptions, StorageState, StoredCookie};

#[derive(Debug, Clone, Default)]
pub struct LaunchOverrides {
    pub headless: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct BrowserLauncher {
    config: Arc<ScraperConfig>,
}

impl BrowserLauncher {
    pub fn new(config: Arc<ScraperConfig>) -> Self {
        Self { config }
    }

    pub async fn launch(&self, options: &ContextOptions) -> BrowserResult<BrowserAutomation> {
        self.launch_with_overrides(options, LaunchOverrides::default())
            .await
    }

    pub async fn launch_with_overrides(
        &self,
        options: &ContextOptions,
        overrides: LaunchOverrides,
    ) -> BrowserResult<BrowserAutomation> {
        let headless = overrides.headless.unwrap_or(self.config.browser.headless);
        let chromium_config = self.build_chromium_config(options, headless)?;
        info!(
            ua = %options.user_agent,
            width = options.viewport[0],
            height = options.viewport[1],
            headless,
            session = options.storage_state.is_some(),
            "Launching Chromium instance"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Chromium handler reported error");
                }
            }
        });

        Ok(BrowserAutomation {
            browser,
            handler_task: Some(handler_task),
            metrics: Arc::new(Mutex::new(BrowserMetrics::default())),
            user_agent: options.user_agent.clone(),
            lang: self.config.browser.lang.clone(),
        })
    }

    fn build_chromium_config(
        &self,
        options: &ContextOptions,
        headless: bool,
    ) -> BrowserResult<ChromiumConfig> {
        let browser = &self.config.browser;
        let [width, height] = options.viewport;
        let mut builder = ChromiumConfig::builder()
            .viewport(ChromiumViewport {
                width,
                height,
                device_scale_factor: None,
                emulating_mobile: false,
                is_landscape: width >= height,
                has_touch: false,
            })
            .request_timeout(Duration::from_millis(self.config.timeouts.page_ms));

        if let Some(executable) = &browser.executable_path {
            builder = builder.chrome_executable(executable);
        }
        if !headless {
            builder = builder.with_head();
        }
        if !browser.sandbox {
            builder = builder.no_sandbox();
        }

        let mut args = vec![
            format!("--user-agent={}", options.user_agent),
            format!("--window-size={width},{height}"),
        ];
        if let Some(lang) = &browser.lang {
            args.push(format!("--lang={lang}"));
        }
        if browser.disable_automation_controlled {
            args.push("--disable-features=AutomationControlled".into());
        }
        args.push("--no-first-run".into());
        args.push("--password-store=basic".into());
        args.extend(browser.extra_args.iter().cloned());

        builder = builder.args(args);

        builder.build().map_err(BrowserError::Configuration)
    }
}

#[derive(Debug)]
pub struct BrowserAutomation {
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
    metrics: Arc<Mutex<BrowserMetrics>>,
    user_agent: String,
    lang: Option<String>,
}

impl BrowserAutomation {
    pub fn metrics(&self) -> BrowserMetrics {
        self.metrics
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn metrics_handle(&self) -> Arc<Mutex<BrowserMetrics>> {
        Arc::clone(&self.metrics)
    }

    /// Opens a fresh tab with the user agent applied and, when given, the
    /// saved session cookies installed.
    pub async fn new_context(&self, state: Option<&StorageState>) -> BrowserResult<BrowserContext> {
        if let Ok(mut metrics) = self.metrics.lock() {
            metrics.record_page_open();
        }
        let params = CreateTargetParams::new("about:blank");
        let page = self.browser.new_page(params).await?;
        self.configure_page(&page).await?;
        let context = BrowserContext {
            page,
            metrics: Arc::clone(&self.metrics),
        };
        if let Some(state) = state {
            context.apply_storage_state(state).await?;
        }
        Ok(context)
    }

    pub async fn shutdown(mut self) -> BrowserResult<()> {
        info!("Shutting down Chromium instance");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "Failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "Browser handler join error");
            }
        }
        Ok(())
    }

    async fn configure_page(&self, page: &Page) -> BrowserResult<()> {
        let mut params_builder =
            SetUserAgentOverrideParams::builder().user_agent(self.user_agent.clone());
        if let Some(lang) = &self.lang {
            params_builder = params_builder.accept_language(lang.clone());
        }
        let params = params_builder
            .build()
            .map_err(BrowserError::Configuration)?;
        page.set_user_agent(params).await?;
        Ok(())
    }
}

impl Drop for BrowserAutomation {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("BrowserAutomation dropped without explicit shutdown");
            }
        }
    }
}

#[derive(Debug)]
pub struct BrowserContext {
    page: Page,
    metrics: Arc<Mutex<BrowserMetrics>>,
}

impl BrowserContext {
    pub fn page(&self) -> &Page {
        &self.page
    }

    pub async fn goto(&self, url: &str) -> BrowserResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        self.with_metrics(BrowserMetrics::record_navigation);
        self.page.goto(params).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    pub async fn reload(&self) -> BrowserResult<()> {
        self.with_metrics(BrowserMetrics::record_navigation);
        self.page.reload().await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    pub async fn apply_storage_state(&self, state: &StorageState) -> BrowserResult<()> {
        let cookies = state
            .cookies
            .iter()
            .map(StoredCookie::to_param)
            .collect::<BrowserResult<Vec<_>>>()?;
        if cookies.is_empty() {
            return Ok(());
        }
        let count = cookies.len();
        self.page.set_cookies(cookies).await?;
        debug!(cookies = count, "session cookies applied");
        Ok(())
    }

    pub async fn storage_state(&self) -> BrowserResult<StorageState> {
        let cookies = self.page.get_cookies().await?;
        Ok(StorageState {
            cookies: cookies.iter().map(StoredCookie::from).collect(),
            origins: Vec::new(),
        })
    }

    pub fn metrics(&self) -> BrowserMetrics {
        self.metrics
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn with_metrics<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut BrowserMetrics) -> R,
    {
        self.metrics.lock().ok().map(|mut guard| f(&mut guard))
    }
}
