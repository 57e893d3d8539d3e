use std::collections::BTreeMap;

use tracing::warn;

use crate::db::PortfolioCompany;
use crate::session::PageSession;

use super::Selectors;

/// Which rendered rows count as "this page's rows".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowScope {
    /// Rows carry a page-index attribute and all pages may be in the DOM at
    /// once; select only the current index.
    PageTagged,
    /// The table re-renders per page; select every rendered row.
    AllRows,
}

impl RowScope {
    pub fn selector(self, page_index: u32, selectors: &Selectors) -> String {
        match self {
            RowScope::PageTagged => selectors.page_tagged_rows(page_index),
            RowScope::AllRows => selectors.table_rows.clone(),
        }
    }
}

/// Header rows the site sometimes renders as data rows.
const HEADER_NAMES: &[&str] = &["company", "name"];

/// Map one row's cell texts (in cell order) to a record. Returns `None` for
/// structural rows: fewer than four cells, or an empty/header-like name.
pub fn record_from_cells(cells: &[String]) -> Option<PortfolioCompany> {
    if cells.len() < 4 {
        return None;
    }

    let name = cells[0].trim();
    if name.is_empty() || HEADER_NAMES.contains(&name.to_lowercase().as_str()) {
        return None;
    }

    let mut extra_data = BTreeMap::new();
    for (index, cell) in cells.iter().enumerate().skip(4) {
        let text = cell.trim();
        if !text.is_empty() {
            extra_data.insert(format!("column_{}", index + 1), text.to_string());
        }
    }

    Some(PortfolioCompany {
        name: name.to_string(),
        asset_class: non_empty(&cells[1]).unwrap_or_else(|| "N/A".to_string()),
        industry: non_empty(&cells[2]),
        region: non_empty(&cells[3]),
        extra_data: (!extra_data.is_empty()).then_some(extra_data),
        description: None,
        website: None,
        headquarters: None,
    })
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Read one row's cells and build its record. Read failures are per-row
/// recoverable: logged, and the row is skipped.
pub async fn extract_row<P: PageSession>(
    page: &P,
    row: &P::Handle,
    selectors: &Selectors,
) -> Option<PortfolioCompany> {
    let cells = match page.query_within(row, &selectors.row_cells).await {
        Ok(cells) => cells,
        Err(e) => {
            warn!("Failed to read row cells: {e}");
            return None;
        }
    };

    let mut texts = Vec::with_capacity(cells.len());
    for cell in &cells {
        match page.text(cell).await {
            Ok(text) => texts.push(text.trim().to_string()),
            Err(e) => {
                warn!("Failed to read cell text: {e}");
                return None;
            }
        }
    }
    record_from_cells(&texts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn fewer_than_four_cells_is_skipped() {
        assert!(record_from_cells(&cells(&["Acme", "Credit", "Tech"])).is_none());
        assert!(record_from_cells(&[]).is_none());
    }

    #[test]
    fn header_like_names_are_skipped() {
        for name in ["Company", "COMPANY", "name", "Name", "", "   "] {
            let row = cells(&[name, "Credit", "Tech", "EMEA"]);
            assert!(record_from_cells(&row).is_none(), "{name:?} should be skipped");
        }
    }

    #[test]
    fn four_cells_map_positionally() {
        let record =
            record_from_cells(&cells(&["Acme", "Growth Equity", "Consumer", "Americas"])).unwrap();
        assert_eq!(record.name, "Acme");
        assert_eq!(record.asset_class, "Growth Equity");
        assert_eq!(record.industry.as_deref(), Some("Consumer"));
        assert_eq!(record.region.as_deref(), Some("Americas"));
        assert!(record.extra_data.is_none());
        assert!(record.description.is_none());
    }

    #[test]
    fn blank_asset_class_gets_sentinel() {
        let record = record_from_cells(&cells(&["Acme", "  ", "Consumer", "Americas"])).unwrap();
        assert_eq!(record.asset_class, "N/A");
    }

    #[test]
    fn blank_industry_and_region_are_absent() {
        let record = record_from_cells(&cells(&["Acme", "Credit", "", " "])).unwrap();
        assert!(record.industry.is_none());
        assert!(record.region.is_none());
    }

    #[test]
    fn overflow_cells_become_extra_data() {
        let record = record_from_cells(&cells(&[
            "Acme", "Credit", "Tech", "EMEA", "2019", "", "Active",
        ]))
        .unwrap();
        let extra = record.extra_data.unwrap();
        assert_eq!(extra.get("column_5").map(String::as_str), Some("2019"));
        assert_eq!(extra.get("column_7").map(String::as_str), Some("Active"));
        assert!(!extra.contains_key("column_6"));
    }

    #[test]
    fn all_empty_overflow_means_no_extra_data() {
        let record =
            record_from_cells(&cells(&["Acme", "Credit", "Tech", "EMEA", "", "  "])).unwrap();
        assert!(record.extra_data.is_none());
    }

    #[test]
    fn row_scope_selectors() {
        let selectors = Selectors::default();
        assert_eq!(
            RowScope::PageTagged.selector(3, &selectors),
            "tr[data-search-page-index=\"3\"]"
        );
        assert_eq!(RowScope::AllRows.selector(3, &selectors), selectors.table_rows);
    }
}
