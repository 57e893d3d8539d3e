mod browser;
mod db;
mod scraper;
mod session;

use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};

use scraper::{PaginationStrategy, RowScope, ScrapeConfig};

#[derive(Parser)]
#[command(
    name = "portfolio-scraper",
    about = "Scrapes an investment portfolio table into SQLite"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    /// Rows tagged with a page index, revealed progressively
    IndexWait,
    /// Full table re-render with a disable-able next control
    DisabledControl,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape the portfolio site and upsert companies into the database
    Scrape {
        /// Pagination strategy to drive the site with
        #[arg(long, value_enum, default_value_t = StrategyArg::IndexWait)]
        strategy: StrategyArg,
        /// Skip the per-row flyout detail expansion
        #[arg(long)]
        skip_details: bool,
        /// Source URL (defaults to $PORTFOLIO_URL, then the built-in URL)
        #[arg(long)]
        url: Option<String>,
    },
    /// List stored companies
    Companies {
        /// Filter by exact region
        #[arg(short, long)]
        region: Option<String>,
        /// Filter by exact industry
        #[arg(short, long)]
        industry: Option<String>,
        /// Filter by exact company name
        #[arg(long)]
        name: Option<String>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show dataset statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Scrape {
            strategy,
            skip_details,
            url,
        } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;

            let mut config = ScrapeConfig::from_env();
            if let Some(url) = url {
                config.url = url;
            }
            config.expand_details = !skip_details;
            match strategy {
                StrategyArg::IndexWait => {
                    config.strategy = PaginationStrategy::IndexWait;
                    config.row_scope = RowScope::PageTagged;
                }
                StrategyArg::DisabledControl => {
                    config.strategy = PaginationStrategy::DisabledControl;
                    config.row_scope = RowScope::AllRows;
                }
            }

            let companies = scraper::run_scrape(&conn, &config).await?;
            println!("Scraping completed successfully ({} companies)", companies.len());
            Ok(())
        }
        Commands::Companies {
            region,
            industry,
            name,
            limit,
            json,
        } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let filter = db::CompanyFilter {
                name,
                region,
                industry,
            };
            let companies = db::fetch_companies(&conn, &filter, Some(limit))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&companies)?);
                return Ok(());
            }
            if companies.is_empty() {
                println!("No companies found.");
                return Ok(());
            }

            println!(
                "{:>3} | {:<28} | {:<16} | {:<14} | {:<10} | {:<24}",
                "#", "Company", "Asset Class", "Industry", "Region", "Headquarters"
            );
            println!("{}", "-".repeat(110));
            for (i, c) in companies.iter().enumerate() {
                println!(
                    "{:>3} | {:<28} | {:<16} | {:<14} | {:<10} | {:<24}",
                    i + 1,
                    truncate(&c.name, 28),
                    truncate(&c.asset_class, 16),
                    truncate(c.industry.as_deref().unwrap_or("-"), 14),
                    truncate(c.region.as_deref().unwrap_or("-"), 10),
                    truncate(c.headquarters.as_deref().unwrap_or("-"), 24),
                );
            }
            println!("\n{} companies", companies.len());
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Companies:  {}", s.total);
            println!("Enriched:   {}", s.enriched);
            println!("Regions:    {}", s.regions);
            println!("Industries: {}", s.industries);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
