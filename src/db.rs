use std::collections::BTreeMap;

use anyhow::Result;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::error;

const DB_PATH: &str = "data/portfolio.sqlite";

/// One portfolio company as scraped from the source table, plus the
/// optional flyout enrichment fields. `name` is the sole natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioCompany {
    pub name: String,
    pub asset_class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Overflow columns beyond the first four, keyed column_5, column_6, …
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_data: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headquarters: Option<String>,
}

pub fn connect() -> Result<Connection> {
    if let Some(dir) = std::path::Path::new(DB_PATH).parent() {
        std::fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(DB_PATH)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS companies (
            name            TEXT PRIMARY KEY,
            asset_class     TEXT NOT NULL DEFAULT 'N/A',
            industry        TEXT,
            region          TEXT,
            extra_data      TEXT,
            description     TEXT,
            website         TEXT,
            headquarters    TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            last_scraped_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_companies_region ON companies(region);
        CREATE INDEX IF NOT EXISTS idx_companies_industry ON companies(industry);
        ",
    )?;
    Ok(())
}

// ── Persistence ──

/// Upsert each company keyed on `name`: insert when unseen, otherwise
/// replace every scraped field with the new values (full-document replace,
/// not a field-level merge — a re-scrape that lost enrichment clears the
/// stale enrichment). `created_at` survives; `last_scraped_at` is refreshed.
/// A failure on one record is logged and does not abort the remaining saves.
pub fn upsert_companies(conn: &Connection, companies: &[PortfolioCompany]) -> Result<usize> {
    let now = chrono::Utc::now().to_rfc3339();
    let tx = conn.unchecked_transaction()?;
    let mut saved = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO companies
             (name, asset_class, industry, region, extra_data, description, website, headquarters, last_scraped_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(name) DO UPDATE SET
               asset_class     = excluded.asset_class,
               industry        = excluded.industry,
               region          = excluded.region,
               extra_data      = excluded.extra_data,
               description     = excluded.description,
               website         = excluded.website,
               headquarters    = excluded.headquarters,
               last_scraped_at = excluded.last_scraped_at",
        )?;
        for c in companies {
            let extra = match c.extra_data.as_ref().map(serde_json::to_string).transpose() {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to encode extra data for {}: {e}", c.name);
                    continue;
                }
            };
            let result = stmt.execute(rusqlite::params![
                c.name, c.asset_class, c.industry, c.region, extra,
                c.description, c.website, c.headquarters, now,
            ]);
            match result {
                Ok(_) => saved += 1,
                Err(e) => error!("Failed to save {}: {e}", c.name),
            }
        }
    }
    tx.commit()?;
    Ok(saved)
}

// ── Queries ──

/// Equality filter for the read path; `None` fields impose no constraint.
#[derive(Debug, Default)]
pub struct CompanyFilter {
    pub name: Option<String>,
    pub region: Option<String>,
    pub industry: Option<String>,
}

pub fn fetch_companies(
    conn: &Connection,
    filter: &CompanyFilter,
    limit: Option<usize>,
) -> Result<Vec<PortfolioCompany>> {
    let mut conditions = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(name) = &filter.name {
        conditions.push(format!("name = ?{}", params.len() + 1));
        params.push(Box::new(name.clone()));
    }
    if let Some(region) = &filter.region {
        conditions.push(format!("region = ?{}", params.len() + 1));
        params.push(Box::new(region.clone()));
    }
    if let Some(industry) = &filter.industry {
        conditions.push(format!("industry = ?{}", params.len() + 1));
        params.push(Box::new(industry.clone()));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };
    let limit_clause = match limit {
        Some(n) => format!(" LIMIT {}", n),
        None => String::new(),
    };

    let sql = format!(
        "SELECT name, asset_class, industry, region, extra_data,
                description, website, headquarters
         FROM companies{}
         ORDER BY name{}",
        where_clause, limit_clause
    );

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), |row| {
            let extra_json: Option<String> = row.get(4)?;
            Ok(PortfolioCompany {
                name: row.get(0)?,
                asset_class: row.get(1)?,
                industry: row.get(2)?,
                region: row.get(3)?,
                extra_data: extra_json.and_then(|s| serde_json::from_str(&s).ok()),
                description: row.get(5)?,
                website: row.get(6)?,
                headquarters: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub total: usize,
    pub enriched: usize,
    pub regions: usize,
    pub industries: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let total: usize = conn.query_row("SELECT COUNT(*) FROM companies", [], |r| r.get(0))?;
    let enriched: usize = conn.query_row(
        "SELECT COUNT(*) FROM companies WHERE description IS NOT NULL",
        [],
        |r| r.get(0),
    )?;
    let regions: usize = conn.query_row(
        "SELECT COUNT(DISTINCT region) FROM companies WHERE region IS NOT NULL",
        [],
        |r| r.get(0),
    )?;
    let industries: usize = conn.query_row(
        "SELECT COUNT(DISTINCT industry) FROM companies WHERE industry IS NOT NULL",
        [],
        |r| r.get(0),
    )?;
    Ok(Stats {
        total,
        enriched,
        regions,
        industries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn company(name: &str, region: &str, industry: &str) -> PortfolioCompany {
        PortfolioCompany {
            name: name.to_string(),
            asset_class: "Growth Equity".to_string(),
            industry: Some(industry.to_string()),
            region: Some(region.to_string()),
            extra_data: None,
            description: None,
            website: None,
            headquarters: None,
        }
    }

    #[test]
    fn upsert_is_idempotent() {
        let conn = test_conn();
        let acme = company("Acme", "Americas", "Consumer");
        upsert_companies(&conn, &[acme.clone()]).unwrap();
        upsert_companies(&conn, &[acme.clone()]).unwrap();

        let stored = fetch_companies(&conn, &CompanyFilter::default(), None).unwrap();
        assert_eq!(stored, vec![acme]);
    }

    #[test]
    fn upsert_replaces_all_fields() {
        let conn = test_conn();
        let mut first = company("Acme", "Americas", "Consumer");
        first.description = Some("An enriched description".to_string());
        upsert_companies(&conn, &[first]).unwrap();

        // Re-scrape with a new region and no enrichment: the old description
        // must not survive the replace.
        let second = company("Acme", "EMEA", "Consumer");
        upsert_companies(&conn, &[second.clone()]).unwrap();

        let stored = fetch_companies(&conn, &CompanyFilter::default(), None).unwrap();
        assert_eq!(stored, vec![second]);
    }

    #[test]
    fn filter_by_region() {
        let conn = test_conn();
        upsert_companies(
            &conn,
            &[
                company("Acme", "Americas", "Consumer"),
                company("Beta", "EMEA", "Tech"),
                company("Gamma", "Americas", "Tech"),
            ],
        )
        .unwrap();

        let filter = CompanyFilter {
            region: Some("Americas".to_string()),
            ..Default::default()
        };
        let stored = fetch_companies(&conn, &filter, None).unwrap();
        let names: Vec<&str> = stored.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Acme", "Gamma"]);
    }

    #[test]
    fn filter_conjunction_and_no_filter() {
        let conn = test_conn();
        upsert_companies(
            &conn,
            &[
                company("Acme", "Americas", "Consumer"),
                company("Beta", "EMEA", "Tech"),
                company("Gamma", "Americas", "Tech"),
            ],
        )
        .unwrap();

        let all = fetch_companies(&conn, &CompanyFilter::default(), None).unwrap();
        assert_eq!(all.len(), 3);

        let filter = CompanyFilter {
            region: Some("Americas".to_string()),
            industry: Some("Tech".to_string()),
            ..Default::default()
        };
        let stored = fetch_companies(&conn, &filter, None).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].name, "Gamma");
    }

    #[test]
    fn extra_data_survives_the_json_column() {
        let conn = test_conn();
        let mut acme = company("Acme", "Americas", "Consumer");
        let mut extra = BTreeMap::new();
        extra.insert("column_5".to_string(), "2019".to_string());
        extra.insert("column_6".to_string(), "Active".to_string());
        acme.extra_data = Some(extra);

        upsert_companies(&conn, &[acme.clone()]).unwrap();
        let stored = fetch_companies(&conn, &CompanyFilter::default(), None).unwrap();
        assert_eq!(stored, vec![acme]);
    }

    #[test]
    fn stats_counts() {
        let conn = test_conn();
        let mut acme = company("Acme", "Americas", "Consumer");
        acme.description = Some("desc".to_string());
        upsert_companies(&conn, &[acme, company("Beta", "EMEA", "Tech")]).unwrap();

        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.enriched, 1);
        assert_eq!(stats.regions, 2);
        assert_eq!(stats.industries, 2);
    }
}
