use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Result of a bounded wait. Best-effort callers may ignore it; callers for
/// whom the timeout is meaningful (end-of-pagination, flyout-shown) match on
/// it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Satisfied,
    TimedOut,
}

impl WaitOutcome {
    pub fn satisfied(self) -> bool {
        matches!(self, WaitOutcome::Satisfied)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("browser call failed: {0}")]
    Browser(String),
}

/// Capability interface over one live page of a driven browser.
///
/// Everything the scraper does to the DOM goes through here, so the
/// extraction, enrichment, and pagination logic runs unchanged against the
/// real chromiumoxide page or the in-memory fake used by the tests.
#[async_trait]
pub trait PageSession: Send + Sync {
    type Handle: Send + Sync;

    /// Load `url` and wait for it to settle, bounded. An error here is the
    /// one fatal condition of a scrape run.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), SessionError>;

    /// All elements matching `selector`, document-scoped, in render order.
    async fn query_all(&self, selector: &str) -> Result<Vec<Self::Handle>, SessionError>;

    /// All elements matching `selector` inside `handle`, in render order.
    async fn query_within(
        &self,
        handle: &Self::Handle,
        selector: &str,
    ) -> Result<Vec<Self::Handle>, SessionError>;

    /// Rendered text content of the element, untrimmed.
    async fn text(&self, handle: &Self::Handle) -> Result<String, SessionError>;

    async fn attribute(
        &self,
        handle: &Self::Handle,
        name: &str,
    ) -> Result<Option<String>, SessionError>;

    /// Synthetic user activation of the element itself.
    async fn click(&self, handle: &Self::Handle) -> Result<(), SessionError>;

    /// Activate the element's enclosing parent. Some controls render the
    /// matchable node (an icon) inside the actual hit target.
    async fn click_parent(&self, handle: &Self::Handle) -> Result<(), SessionError>;

    /// Synthetic Escape key press, the dismiss gesture for overlays.
    async fn press_escape(&self) -> Result<(), SessionError>;

    async fn wait_for(&self, selector: &str, timeout: Duration) -> WaitOutcome;

    async fn wait_for_gone(&self, selector: &str, timeout: Duration) -> WaitOutcome;

    /// Wait until no new network activity has been seen for a grace period.
    async fn wait_for_network_idle(&self, timeout: Duration) -> WaitOutcome;
}

// ── In-memory fake for tests ──
