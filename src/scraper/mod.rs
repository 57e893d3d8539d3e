pub mod extract;
pub mod flyout;
pub mod pagination;

use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use rusqlite::Connection;
use tracing::{error, info, warn};

use crate::browser::HeadlessBrowser;
use crate::db::{self, PortfolioCompany};
use crate::session::PageSession;

pub use extract::RowScope;
pub use pagination::{Advance, PaginationStrategy};

const DEFAULT_URL: &str = "https://www.kkr.com/invest/portfolio";
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Every DOM selector the scraper touches, in one place. The site's markup
/// is expected to evolve; this is the single edit point when it does.
#[derive(Debug, Clone)]
pub struct Selectors {
    pub table_rows: String,
    pub row_cells: String,
    pub page_index_attr: String,
    pub next_control: String,
    pub flyout_shown: String,
    pub flyout_body: String,
    pub flyout_description: String,
    pub flyout_website_anchors: String,
    pub flyout_headquarters: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            table_rows: "table tr".to_string(),
            row_cells: "td".to_string(),
            page_index_attr: "data-search-page-index".to_string(),
            next_control: "[aria-label=\"pagination arrow right\"]".to_string(),
            flyout_shown: ".cmp-portfolio-filter__flyout.show".to_string(),
            flyout_body: ".cmp-portfolio-filter__flyout-body".to_string(),
            flyout_description: ".cmp-portfolio-filter__portfolio-description p".to_string(),
            flyout_website_anchors: ".cmp-portfolio-filter__general-details > div a[href]"
                .to_string(),
            flyout_headquarters: ".cmp-portfolio-filter__flyout-body .sub-desc".to_string(),
        }
    }
}

impl Selectors {
    /// Rows tagged with one specific page index.
    pub fn page_tagged_rows(&self, index: u32) -> String {
        format!("tr[{}=\"{}\"]", self.page_index_attr, index)
    }
}

#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    pub url: String,
    pub strategy: PaginationStrategy,
    pub row_scope: RowScope,
    pub expand_details: bool,
    pub selectors: Selectors,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            strategy: PaginationStrategy::IndexWait,
            row_scope: RowScope::PageTagged,
            expand_details: true,
            selectors: Selectors::default(),
        }
    }
}

impl ScrapeConfig {
    /// Default config with the `PORTFOLIO_URL` environment override applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("PORTFOLIO_URL") {
            config.url = url;
        }
        config
    }
}

/// Drives one scrape run: navigate, then page-by-page harvest with optional
/// per-row enrichment, strictly sequentially (one flyout open at a time).
pub struct ScrapeController {
    config: ScrapeConfig,
}

impl ScrapeController {
    pub fn new(config: ScrapeConfig) -> Self {
        Self { config }
    }

    /// Harvest every page into one accumulated list.
    ///
    /// The only fatal condition is the initial navigation; everything after
    /// it degrades to partial results with warnings.
    pub async fn harvest<P: PageSession>(&self, page: &P) -> Result<Vec<PortfolioCompany>> {
        let config = &self.config;
        info!("Navigating to {}...", config.url);
        page.navigate(&config.url, NAVIGATION_TIMEOUT)
            .await
            .with_context(|| format!("failed to load {}", config.url))?;

        let mut companies = Vec::new();
        let mut page_index: u32 = 1;

        loop {
            if !config
                .strategy
                .prepare(page, page_index, &config.selectors)
                .await
                .satisfied()
            {
                info!("No content for page {page_index}. Assuming end of pagination.");
                break;
            }

            let row_selector = config.row_scope.selector(page_index, &config.selectors);
            let rows = match page.query_all(&row_selector).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!("Failed to collect rows for page {page_index}: {e}");
                    break;
                }
            };

            let mut scraped_on_page = 0;
            for row in &rows {
                let Some(mut company) =
                    extract::extract_row(page, row, &config.selectors).await
                else {
                    continue;
                };
                if config.expand_details {
                    flyout::enrich(page, row, &mut company, &config.selectors).await;
                }
                companies.push(company);
                scraped_on_page += 1;
            }
            info!("Scraped page {page_index} ({scraped_on_page} companies)");

            match config.strategy.advance(page, &config.selectors).await {
                Advance::Advanced => page_index += 1,
                Advance::End => break,
            }
        }

        info!("Found a total of {} companies.", companies.len());
        Ok(companies)
    }
}

/// One full scrape run against the real browser: launch, harvest, persist,
/// teardown. The browser is closed on every exit path; a persistence failure
/// is logged and swallowed — the scrape still returns its records.
pub async fn run_scrape(
    conn: &Connection,
    config: &ScrapeConfig,
) -> Result<Vec<PortfolioCompany>> {
    info!("Launching browser...");
    let browser = HeadlessBrowser::launch().await?;
    let page = match browser.open_page().await {
        Ok(page) => page,
        Err(e) => {
            browser.close().await;
            return Err(e);
        }
    };

    let spinner = ProgressBar::new_spinner();
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message("scraping portfolio pages...");

    let controller = ScrapeController::new(config.clone());
    let result = controller.harvest(&page).await;

    spinner.finish_and_clear();
    browser.close().await;

    let companies = match result {
        Ok(companies) => companies,
        Err(e) => {
            error!("Error during scraping: {e:#}");
            return Err(e);
        }
    };

    info!("Saving {} companies to database...", companies.len());
    match db::upsert_companies(conn, &companies) {
        Ok(saved) => info!("Database update complete ({saved} companies)."),
        Err(e) => error!("Failed to save companies to database: {e:#}"),
    }

    Ok(companies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::fake::{FakeFlyout, FakePage};

    fn controller(strategy: PaginationStrategy, scope: RowScope, details: bool) -> ScrapeController {
        ScrapeController::new(ScrapeConfig {
            url: "https://portfolio.example/companies".to_string(),
            strategy,
            row_scope: scope,
            expand_details: details,
            selectors: Selectors::default(),
        })
    }

    #[tokio::test]
    async fn two_pages_with_header_lookalike_row() {
        let page = FakePage::new()
            .with_rows(
                1,
                &[
                    &["Acme", "Growth Equity", "Consumer", "Americas"],
                    &["Name", "AssetClass", "Industry", "Region"],
                ],
            )
            .with_rows(2, &[&["Beta", "Credit", "Tech", "EMEA"]])
            .last_page_with_next(1);

        let companies = controller(PaginationStrategy::IndexWait, RowScope::PageTagged, false)
            .harvest(&page)
            .await
            .unwrap();

        let summary: Vec<(&str, &str, Option<&str>, Option<&str>)> = companies
            .iter()
            .map(|c| {
                (
                    c.name.as_str(),
                    c.asset_class.as_str(),
                    c.industry.as_deref(),
                    c.region.as_deref(),
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("Acme", "Growth Equity", Some("Consumer"), Some("Americas")),
                ("Beta", "Credit", Some("Tech"), Some("EMEA")),
            ]
        );
        assert_eq!(page.navigated_to().as_deref(), Some("https://portfolio.example/companies"));
    }

    #[tokio::test]
    async fn missing_page_index_terminates_without_error() {
        // A next control still exists on page 2, but page 3's rows never
        // appear: the index wait is the termination signal.
        let page = FakePage::new()
            .with_rows(1, &[&["Acme", "Credit", "Tech", "EMEA"]])
            .with_rows(2, &[&["Beta", "Credit", "Tech", "EMEA"]])
            .last_page_with_next(2);

        let companies = controller(PaginationStrategy::IndexWait, RowScope::PageTagged, false)
            .harvest(&page)
            .await
            .unwrap();

        assert_eq!(companies.len(), 2);
        assert_eq!(page.next_clicks(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn row_enrichment_failure_is_isolated() {
        let flyout = |desc: &str| FakeFlyout {
            description: Some(desc.to_string()),
            ..FakeFlyout::default()
        };
        let page = FakePage::new()
            .with_rows(
                1,
                &[
                    &["Acme", "Credit", "Tech", "EMEA"],
                    &["Beta", "Credit", "Tech", "EMEA"],
                    &["Gamma", "Credit", "Tech", "EMEA"],
                ],
            )
            .with_flyout("Acme", flyout("About Acme"))
            .with_flyout("Gamma", flyout("About Gamma"))
            .row_click_fails("Beta");

        let companies = controller(PaginationStrategy::IndexWait, RowScope::PageTagged, true)
            .harvest(&page)
            .await
            .unwrap();

        assert_eq!(companies.len(), 3);
        assert_eq!(companies[0].description.as_deref(), Some("About Acme"));
        assert!(companies[1].description.is_none());
        assert_eq!(companies[2].description.as_deref(), Some("About Gamma"));
        // One dismiss per successful close plus the forced one on failure.
        assert_eq!(page.escape_presses(), 3);
    }

    #[tokio::test]
    async fn disabled_control_strategy_walks_rerendered_pages() {
        let page = FakePage::new()
            .with_rows(1, &[&["Acme", "Credit", "Tech", "EMEA"]])
            .with_rows(2, &[&["Beta", "Credit", "Tech", "EMEA"]])
            .last_page_with_next(5)
            .disable_next_at(2, false);

        let companies = controller(
            PaginationStrategy::DisabledControl,
            RowScope::AllRows,
            false,
        )
        .harvest(&page)
        .await
        .unwrap();

        let names: Vec<&str> = companies.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Acme", "Beta"]);
        assert_eq!(page.next_clicks(), 1);
    }

    #[tokio::test]
    async fn navigation_failure_is_fatal() {
        let page = FakePage::new()
            .with_rows(1, &[&["Acme", "Credit", "Tech", "EMEA"]])
            .navigate_fails();

        let result = controller(PaginationStrategy::IndexWait, RowScope::PageTagged, false)
            .harvest(&page)
            .await;
        assert!(result.is_err());
    }
}
