use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::element::Element;
use tokio::time::{sleep, Instant};

use super::automation::BrowserContext;
use super::error::{BrowserError, BrowserResult};

const SELECTOR_POLL: Duration = Duration::from_millis(250);

/// One post container on the timeline. Selectors are evaluated relative to
/// the container.
#[async_trait(?Send)]
pub trait DomContainer {
    async fn count(&self, selector: &str) -> BrowserResult<usize>;
    async fn text(&self, selector: &str) -> BrowserResult<Option<String>>;
    async fn attribute(&self, selector: &str, name: &str) -> BrowserResult<Option<String>>;
    async fn attributes(&self, selector: &str, name: &str) -> BrowserResult<Vec<String>>;
}

/// The browser page a profile timeline is loaded into.
#[async_trait(?Send)]
pub trait ProfilePage {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()>;
    async fn reload(&mut self) -> BrowserResult<()>;
    async fn content(&mut self) -> BrowserResult<String>;
    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration)
        -> BrowserResult<bool>;
    async fn containers(&mut self, selector: &str) -> BrowserResult<Vec<Box<dyn DomContainer>>>;
    async fn scroll_by(&mut self, delta_y: i64) -> BrowserResult<()>;
}

pub struct BrowserProfilePage {
    context: BrowserContext,
}

impl BrowserProfilePage {
    pub fn new(context: BrowserContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &BrowserContext {
        &self.context
    }
}

#[async_trait(?Send)]
impl ProfilePage for BrowserProfilePage {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        self.context.goto(url).await
    }

    async fn reload(&mut self) -> BrowserResult<()> {
        self.context.reload().await
    }

    async fn content(&mut self) -> BrowserResult<String> {
        Ok(self.context.page().content().await?)
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> BrowserResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.context.page().find_element(selector).await.is_ok() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(SELECTOR_POLL).await;
        }
    }

    async fn containers(&mut self, selector: &str) -> BrowserResult<Vec<Box<dyn DomContainer>>> {
        let elements = match self.context.page().find_elements(selector).await {
            Ok(elements) => elements,
            // querySelectorAll with no match surfaces as an error on some builds
            Err(_) => return Ok(Vec::new()),
        };
        Ok(elements
            .into_iter()
            .map(|element| Box::new(ElementContainer { element }) as Box<dyn DomContainer>)
            .collect())
    }

    async fn scroll_by(&mut self, delta_y: i64) -> BrowserResult<()> {
        let script = format!("window.scrollBy(0, {delta_y});");
        self.context
            .page()
            .evaluate(script.as_str())
            .await
            .map_err(|err| {
                BrowserError::Unexpected(format!("failed to execute scroll script: {err}"))
            })?;
        Ok(())
    }
}

pub struct ElementContainer {
    element: Element,
}

impl ElementContainer {
    async fn matches(&self, selector: &str) -> Vec<Element> {
        self.element
            .find_elements(selector)
            .await
            .unwrap_or_default()
    }
}

#[async_trait(?Send)]
impl DomContainer for ElementContainer {
    async fn count(&self, selector: &str) -> BrowserResult<usize> {
        Ok(self.matches(selector).await.len())
    }

    async fn text(&self, selector: &str) -> BrowserResult<Option<String>> {
        match self.matches(selector).await.first() {
            Some(element) => Ok(element.inner_text().await?),
            None => Ok(None),
        }
    }

    async fn attribute(&self, selector: &str, name: &str) -> BrowserResult<Option<String>> {
        match self.matches(selector).await.first() {
            Some(element) => Ok(element.attribute(name).await?),
            None => Ok(None),
        }
    }

    async fn attributes(&self, selector: &str, name: &str) -> BrowserResult<Vec<String>> {
        let mut values = Vec::new();
        for element in self.matches(selector).await {
            if let Some(value) = element.attribute(name).await? {
                values.push(value);
            }
        }
        Ok(values)
    }
}
