//! Chromium adapter for the page capabilities the harvester needs

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::{DispatchKeyEventParams, DispatchKeyEventType};
use chromiumoxide::layout::Point;
use chromiumoxide::{Element, Page};
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::BoundingBox;
use crate::traits::{GalleryPage, PageElement};

/// Driver default for a single CDP request
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Headroom so the navigation deadline fires before the CDP one
const REQUEST_TIMEOUT_SLACK: Duration = Duration::from_secs(5);

fn request_timeout(navigation_timeout: Duration) -> Duration {
    (navigation_timeout + REQUEST_TIMEOUT_SLACK).max(DEFAULT_REQUEST_TIMEOUT)
}

const IS_VISIBLE_FN: &str = r#"function() {
    const style = window.getComputedStyle(this);
    if (style.display === 'none' || style.visibility === 'hidden') return false;
    return this.getClientRects().length > 0;
}"#;

pub struct ChromeBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl ChromeBrowser {
    /// CDP requests may run at least as long as `navigation_timeout`
    pub async fn launch(
        headless: bool,
        viewport: (u32, u32),
        navigation_timeout: Duration,
    ) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(viewport.0, viewport.1)
            .viewport(None)
            .request_timeout(request_timeout(navigation_timeout))
            .arg("--disable-dev-shm-usage");

        if !headless {
            builder = builder.with_head();
        }

        let config = builder
            .build()
            .map_err(|e| anyhow!("failed to build browser config: {e}"))?;

        info!(headless, "Launching Chromium");
        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        let handler = tokio::spawn(async move { while handler.next().await.is_some() {} });

        Ok(Self { browser, handler })
    }

    pub async fn new_page(&self) -> Result<ChromePage> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("failed to open a new tab")?;

        Ok(ChromePage { page })
    }

    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Browser close returned error: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            debug!("Waiting for browser exit failed: {}", e);
        }
        self.handler.abort();
        info!("Browser closed");
    }
}

pub struct ChromePage {
    page: Page,
}

fn wrap(elements: Vec<Element>) -> Vec<Box<dyn PageElement>> {
    elements
        .into_iter()
        .map(|element| Box::new(ChromeElement { element }) as Box<dyn PageElement>)
        .collect()
}

impl ChromePage {
    async fn dispatch_key(&self, kind: DispatchKeyEventType, key: &str) -> Result<()> {
        let mut params = DispatchKeyEventParams::builder()
            .r#type(kind)
            .key(key)
            .code(key);
        if let Some(code) = virtual_key_code(key) {
            params = params.windows_virtual_key_code(code);
        }
        let params = params
            .build()
            .map_err(|e| anyhow!("failed to build key event: {e}"))?;

        self.page
            .execute(params)
            .await
            .with_context(|| format!("dispatching {key} failed"))?;
        Ok(())
    }
}

fn virtual_key_code(key: &str) -> Option<i64> {
    match key {
        "ArrowLeft" => Some(37),
        "ArrowUp" => Some(38),
        "ArrowRight" => Some(39),
        "ArrowDown" => Some(40),
        "Escape" => Some(27),
        _ => None,
    }
}

#[async_trait]
impl GalleryPage for ChromePage {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        let load = async {
            self.page.goto(url).await.context("navigation failed")?;
            if let Err(e) = self.page.wait_for_navigation().await {
                debug!("Waiting for load event failed: {}", e);
            }
            Ok::<(), anyhow::Error>(())
        };

        match tokio::time::timeout(timeout, load).await {
            Ok(result) => result,
            Err(_) => bail!("navigation timed out after {timeout:?}"),
        }
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<Box<dyn PageElement>>> {
        let elements = self.page.find_elements(selector).await?;
        Ok(wrap(elements))
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.dispatch_key(DispatchKeyEventType::KeyDown, key).await?;
        self.dispatch_key(DispatchKeyEventType::KeyUp, key).await
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<()> {
        self.page.click(Point { x, y }).await?;
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .page
            .evaluate(expression)
            .await
            .context("JS execution failed")?;

        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn content(&self) -> Result<String> {
        Ok(self.page.content().await?)
    }

    async fn viewport_width(&self) -> Result<f64> {
        let width = self.evaluate("window.innerWidth").await?;
        width
            .as_f64()
            .ok_or_else(|| anyhow!("window.innerWidth is not a number: {width}"))
    }
}

pub struct ChromeElement {
    element: Element,
}

#[async_trait]
impl PageElement for ChromeElement {
    async fn is_visible(&self) -> Result<bool> {
        Ok(self.evaluate(IS_VISIBLE_FN).await?.as_bool().unwrap_or(false))
    }

    async fn bounding_box(&self) -> Result<Option<BoundingBox>> {
        // Chromium has no box model for elements that are not rendered
        match self.element.bounding_box().await {
            Ok(bbox) => Ok(Some(BoundingBox {
                x: bbox.x,
                y: bbox.y,
                width: bbox.width,
                height: bbox.height,
            })),
            Err(e) => {
                debug!("No box model: {}", e);
                Ok(None)
            }
        }
    }

    async fn attribute(&self, name: &str) -> Result<Option<String>> {
        Ok(self.element.attribute(name).await?)
    }

    async fn click(&self) -> Result<()> {
        self.element.click().await?;
        Ok(())
    }

    async fn evaluate(&self, function: &str) -> Result<Value> {
        let returns = self.element.call_js_fn(function, false).await?;
        if let Some(exception) = returns.exception_details {
            bail!("script threw: {}", exception.text);
        }
        Ok(returns.result.value.unwrap_or(Value::Null))
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<Box<dyn PageElement>>> {
        let elements = self.element.find_elements(selector).await?;
        Ok(wrap(elements))
    }
}
