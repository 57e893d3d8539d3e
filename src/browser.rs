use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::error::CdpError;
use chromiumoxide::{Element, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::session::{PageSession, SessionError, WaitOutcome};

/// Hardening flags for containerized headless runs.
const LAUNCH_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--no-first-run",
    "--no-zygote",
];

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Owns the browser process and its CDP event loop. One scrape run owns one
/// of these exclusively; `close` must run on every exit path.
pub struct HeadlessBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl HeadlessBrowser {
    pub async fn launch() -> Result<Self> {
        let mut builder = BrowserConfig::builder().args(LAUNCH_ARGS.to_vec());
        match std::env::var("CHROME_PATH") {
            Ok(path) => {
                info!("Using browser executable: {path}");
                builder = builder.chrome_executable(path);
            }
            Err(_) => info!("Using system-resolved browser executable"),
        }
        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("invalid browser config: {e}"))?;

        let (browser, mut events) = Browser::launch(config)
            .await
            .context("failed to launch headless browser")?;
        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        Ok(Self { browser, handler })
    }

    pub async fn open_page(&self) -> Result<BrowserPage> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("failed to open a browser page")?;
        Ok(BrowserPage { page })
    }

    /// Best-effort teardown; never fails the run it ends.
    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser cleanly: {e}");
        }
        if let Err(e) = self.browser.wait().await {
            debug!("Browser process wait ended with: {e}");
        }
        self.handler.abort();
    }
}

/// `PageSession` over a live chromiumoxide page.
pub struct BrowserPage {
    page: Page,
}

/// Zero matches surface as `CdpError::NotFound`; the scraper treats that as
/// an empty result, not a failure.
fn none_as_empty(result: Result<Vec<Element>, CdpError>) -> Result<Vec<Element>, SessionError> {
    match result {
        Ok(elements) => Ok(elements),
        Err(CdpError::NotFound) => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

impl From<CdpError> for SessionError {
    fn from(e: CdpError) -> Self {
        SessionError::Browser(e.to_string())
    }
}

#[async_trait]
impl PageSession for BrowserPage {
    type Handle = Element;

    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), SessionError> {
        let load = async {
            self.page.goto(url).await?;
            self.page.wait_for_navigation().await?;
            Ok::<_, CdpError>(())
        };
        match tokio::time::timeout(timeout, load).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SessionError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(SessionError::Navigation {
                url: url.to_string(),
                reason: format!("timed out after {timeout:?}"),
            }),
        }
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<Element>, SessionError> {
        none_as_empty(self.page.find_elements(selector).await)
    }

    async fn query_within(
        &self,
        handle: &Element,
        selector: &str,
    ) -> Result<Vec<Element>, SessionError> {
        none_as_empty(handle.find_elements(selector).await)
    }

    async fn text(&self, handle: &Element) -> Result<String, SessionError> {
        Ok(handle.inner_text().await?.unwrap_or_default())
    }

    async fn attribute(
        &self,
        handle: &Element,
        name: &str,
    ) -> Result<Option<String>, SessionError> {
        Ok(handle.attribute(name).await?)
    }

    async fn click(&self, handle: &Element) -> Result<(), SessionError> {
        handle.click().await?;
        Ok(())
    }

    async fn click_parent(&self, handle: &Element) -> Result<(), SessionError> {
        handle
            .call_js_fn(
                "function() { const p = this.parentElement; if (p) { p.click(); } }",
                false,
            )
            .await?;
        Ok(())
    }

    async fn press_escape(&self) -> Result<(), SessionError> {
        let body = self.page.find_element("body").await?;
        body.press_key("Escape").await?;
        Ok(())
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> WaitOutcome {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return WaitOutcome::Satisfied;
            }
            if tokio::time::Instant::now() >= deadline {
                return WaitOutcome::TimedOut;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_gone(&self, selector: &str, timeout: Duration) -> WaitOutcome {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.page.find_element(selector).await.is_err() {
                return WaitOutcome::Satisfied;
            }
            if tokio::time::Instant::now() >= deadline {
                return WaitOutcome::TimedOut;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> WaitOutcome {
        match tokio::time::timeout(timeout, self.page.wait_for_navigation()).await {
            Ok(Ok(_)) => WaitOutcome::Satisfied,
            Ok(Err(e)) => {
                debug!("Navigation wait ended with: {e}");
                WaitOutcome::TimedOut
            }
            Err(_) => WaitOutcome::TimedOut,
        }
    }
}
