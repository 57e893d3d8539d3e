use std::time::Duration;

use tracing::{debug, info, warn};

use crate::session::{PageSession, WaitOutcome};

use super::Selectors;

const PAGE_CONTENT_TIMEOUT: Duration = Duration::from_secs(10);
const NETWORK_IDLE_TIMEOUT: Duration = Duration::from_secs(5);
const ADVANCE_FALLBACK_DELAY: Duration = Duration::from_secs(2);

/// How the driver detects the next page and the end of pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationStrategy {
    /// Rows are tagged with their page index and revealed progressively.
    /// A timeout waiting for the next index is the normal end signal; the
    /// next control's hit target is its enclosing element.
    IndexWait,
    /// The table re-renders per page. The next control reports the end via
    /// a disabled attribute or class; advances settle on network idle.
    DisabledControl,
}

/// Outcome of an advance attempt. `End` covers every normal termination:
/// absent control, disabled control, or a failed activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Advanced,
    End,
}

impl PaginationStrategy {
    /// Wait for page `index`'s content before harvesting. A timeout is the
    /// normal end-of-pagination signal, not an error.
    pub async fn prepare<P: PageSession>(
        self,
        page: &P,
        index: u32,
        selectors: &Selectors,
    ) -> WaitOutcome {
        let selector = match self {
            PaginationStrategy::IndexWait => selectors.page_tagged_rows(index),
            PaginationStrategy::DisabledControl => selectors.table_rows.clone(),
        };
        page.wait_for(&selector, PAGE_CONTENT_TIMEOUT).await
    }

    /// Try to move to the next page. Guaranteed to either advance or end.
    pub async fn advance<P: PageSession>(self, page: &P, selectors: &Selectors) -> Advance {
        let controls = match page.query_all(&selectors.next_control).await {
            Ok(controls) => controls,
            Err(e) => {
                warn!("Failed to look up next-page control: {e}");
                return Advance::End;
            }
        };
        let Some(control) = controls.first() else {
            info!("Next-page control not found. Reached the last page or no pagination.");
            return Advance::End;
        };

        match self {
            PaginationStrategy::IndexWait => {
                // No wait after the click; the next iteration's index wait
                // covers synchronization.
                if let Err(e) = page.click_parent(control).await {
                    warn!("Failed to activate next-page control: {e}");
                    return Advance::End;
                }
                Advance::Advanced
            }
            PaginationStrategy::DisabledControl => {
                match is_disabled(page, control).await {
                    Ok(true) => {
                        info!("Next-page control is disabled. Reached the last page.");
                        return Advance::End;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Failed to inspect next-page control: {e}");
                        return Advance::End;
                    }
                }
                if let Err(e) = page.click(control).await {
                    warn!("Failed to activate next-page control: {e}");
                    return Advance::End;
                }
                if !page
                    .wait_for_network_idle(NETWORK_IDLE_TIMEOUT)
                    .await
                    .satisfied()
                {
                    debug!(
                        "No network quiescence within {NETWORK_IDLE_TIMEOUT:?}; \
                         falling back to a fixed delay"
                    );
                    tokio::time::sleep(ADVANCE_FALLBACK_DELAY).await;
                }
                Advance::Advanced
            }
        }
    }
}

async fn is_disabled<P: PageSession>(
    page: &P,
    control: &P::Handle,
) -> Result<bool, crate::session::SessionError> {
    if page.attribute(control, "disabled").await?.is_some() {
        return Ok(true);
    }
    let class = page.attribute(control, "class").await?.unwrap_or_default();
    Ok(class.split_whitespace().any(|c| c.contains("disabled")))
}
