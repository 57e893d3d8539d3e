use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{anyhow, Result};
use regex::Regex;
use tracing::{debug, warn};

use crate::db::PortfolioCompany;
use crate::session::PageSession;

use super::Selectors;

const FLYOUT_SHOW_TIMEOUT: Duration = Duration::from_secs(3);
const FLYOUT_HIDE_TIMEOUT: Duration = Duration::from_secs(3);
const TABLE_SETTLE_TIMEOUT: Duration = Duration::from_secs(1);
const FAILURE_SETTLE: Duration = Duration::from_millis(500);

static HQ_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(headquarters|hq):?\s*").unwrap());

#[derive(Debug, Default)]
struct FlyoutDetails {
    description: Option<String>,
    website: Option<String>,
    headquarters: Option<String>,
}

/// Expand the row's detail flyout and copy its fields onto `company`.
///
/// Any failure is confined to this row: the basic record stays as-is, a
/// warning names the row, a dismiss is force-attempted, and a short settle
/// pause lets the UI recover before the next row.
pub async fn enrich<P: PageSession>(
    page: &P,
    row: &P::Handle,
    company: &mut PortfolioCompany,
    selectors: &Selectors,
) {
    match expand(page, row, selectors).await {
        Ok(details) => {
            company.description = details.description;
            company.website = details.website;
            company.headquarters = details.headquarters;
            close(page, selectors).await;
        }
        Err(err) => {
            let name = row_name_for_diagnostics(page, row, selectors).await;
            warn!("Skipping details for {name}: {err:#}");
            if page.press_escape().await.is_err() {
                debug!("Dismiss attempt after failed expansion also failed");
            }
            tokio::time::sleep(FAILURE_SETTLE).await;
        }
    }
}

async fn expand<P: PageSession>(
    page: &P,
    row: &P::Handle,
    selectors: &Selectors,
) -> Result<FlyoutDetails> {
    page.click(row).await?;

    if !page
        .wait_for(&selectors.flyout_shown, FLYOUT_SHOW_TIMEOUT)
        .await
        .satisfied()
    {
        return Err(anyhow!(
            "flyout did not appear within {FLYOUT_SHOW_TIMEOUT:?}"
        ));
    }

    let mut details = FlyoutDetails::default();

    let descriptions = page.query_all(&selectors.flyout_description).await?;
    if let Some(el) = descriptions.first() {
        let text = page.text(el).await?;
        details.description = non_empty(text.trim());
    }

    // Later anchors silently override earlier ones when the general-details
    // section holds several.
    let anchors = page.query_all(&selectors.flyout_website_anchors).await?;
    for anchor in &anchors {
        if let Some(href) = page.attribute(anchor, "href").await? {
            if !href.is_empty() {
                details.website = Some(href);
            }
        }
    }

    let headquarters = page.query_all(&selectors.flyout_headquarters).await?;
    if let Some(el) = headquarters.first() {
        let text = page.text(el).await?;
        details.headquarters = non_empty(&strip_hq_label(text.trim()));
    }

    Ok(details)
}

/// Dismiss the flyout and give the row list a moment to become interactive
/// again. Every step here is tolerated to fail.
async fn close<P: PageSession>(page: &P, selectors: &Selectors) {
    if let Err(e) = page.press_escape().await {
        warn!("Failed to dismiss flyout: {e}");
    }
    if !page
        .wait_for_gone(&selectors.flyout_body, FLYOUT_HIDE_TIMEOUT)
        .await
        .satisfied()
    {
        debug!("Flyout still visible after {FLYOUT_HIDE_TIMEOUT:?}; continuing");
    }
    let _ = page
        .wait_for(&selectors.table_rows, TABLE_SETTLE_TIMEOUT)
        .await;
}

/// Best-effort row identification for the warning log.
async fn row_name_for_diagnostics<P: PageSession>(
    page: &P,
    row: &P::Handle,
    selectors: &Selectors,
) -> String {
    let Ok(cells) = page.query_within(row, &selectors.row_cells).await else {
        return "unknown".to_string();
    };
    let Some(first) = cells.first() else {
        return "unknown".to_string();
    };
    match page.text(first).await {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        _ => "unknown".to_string(),
    }
}

fn strip_hq_label(text: &str) -> String {
    HQ_LABEL.replace(text, "").trim().to_string()
}

fn non_empty(text: &str) -> Option<String> {
    (!text.is_empty()).then(|| text.to_string())
}
