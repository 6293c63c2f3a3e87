use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;

use govuk_scraper::config::Settings;
use govuk_scraper::db::Db;
use govuk_scraper::fetch::{CachedFetcher, Fetch, HttpFetcher};
use govuk_scraper::fields::name_from_url;
use govuk_scraper::model::ChangeSummary;
use govuk_scraper::parser::{parse_page, PageKind};
use govuk_scraper::scraper::Scraper;
use govuk_scraper::stats::{FieldStats, RunStats};

#[derive(Parser)]
#[command(name = "govuk_scraper", about = "Scrape GOV.UK publications into SQLite")]
struct Cli {
    /// Always fetch from the network, bypassing the HTML cache
    #[arg(long, global = true)]
    no_cache: bool,
    /// Print results as JSON instead of text
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,
    /// Walk the publication index and scrape every listed publication
    Publications {
        /// Index query string, e.g. "keywords=ilr&departments[]=home-office"
        #[arg(short, long)]
        filter: Option<String>,
        /// Max publications to scrape (default: the whole index)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Scrape one publication and whatever it references
    Publication { url: String },
    /// Scrape one collection and its organization
    Collection { url: String },
    /// Scrape one organization
    Organization { url: String },
    /// Fetch and parse a page without saving it
    Parse { url: String },
    /// Show row counts
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load().context("loading settings")?;

    let db = Db::open(&settings.db_path)
        .with_context(|| format!("opening {}", settings.db_path.display()))?;
    db.init_schema()?;

    let http = HttpFetcher::new(
        &settings.user_agent,
        settings.timeout(),
        settings.request_delay(),
    )?;
    let result = if cli.no_cache {
        run(cli.command, cli.json, http, db, &settings).await
    } else {
        let cached = CachedFetcher::open(&settings.cache_path, http, settings.cache_max_age())
            .with_context(|| format!("opening cache {}", settings.cache_path.display()))?;
        run(cli.command, cli.json, cached, db, &settings).await
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 && !cli.json {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn run<F: Fetch>(
    command: Commands,
    json: bool,
    fetcher: F,
    db: Db,
    settings: &Settings,
) -> anyhow::Result<()> {
    match command {
        Commands::Init => {
            println!("Schema ready in {}", settings.db_path.display());
            Ok(())
        }
        Commands::Stats => {
            let counts = db.counts()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&counts)?);
            } else {
                println!("Organizations: {}", counts.organizations);
                println!("Collections:   {}", counts.collections);
                println!("Publications:  {}", counts.publications);
                println!("Attachments:   {}", counts.attachments);
            }
            Ok(())
        }
        Commands::Parse { url } => {
            let Some(kind) = PageKind::from_url(&url) else {
                bail!("not a publication, collection, organisation or index url: {}", url);
            };
            let name = name_from_url(&url).unwrap_or_default();
            let html = fetcher.fetch(&url).await?;
            let mut fields = FieldStats::default();
            let page = parse_page(kind, &html, &url, &name, &mut fields);
            println!("{}", serde_json::to_string_pretty(&page)?);
            for line in fields.not_found() {
                eprintln!("  {}", line);
            }
            Ok(())
        }
        Commands::Publications { filter, limit } => {
            let mut scraper = Scraper::new(fetcher, db, &settings.base_url);
            scraper.reset_stats();
            let attempted = scraper
                .scrape_and_save_publications(filter.as_deref(), limit)
                .await?;
            if !json {
                println!("Attempted {} publications", attempted);
            }
            report(json, None, scraper.stats())
        }
        Commands::Publication { url } => {
            let mut scraper = Scraper::new(fetcher, db, &settings.base_url);
            let saved = scraper.scrape_and_save_publication(&url).await?;
            report(json, Some(saved.summary()), scraper.stats())
        }
        Commands::Collection { url } => {
            let mut scraper = Scraper::new(fetcher, db, &settings.base_url);
            let saved = scraper.scrape_and_save_collection(&url).await?;
            report(json, Some(saved.summary()), scraper.stats())
        }
        Commands::Organization { url } => {
            let mut scraper = Scraper::new(fetcher, db, &settings.base_url);
            let saved = scraper.scrape_and_save_organization(&url).await?;
            report(json, Some(saved.summary()), scraper.stats())
        }
    }
}

#[derive(Serialize)]
struct Report<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ChangeSummary>,
    stats: &'a RunStats,
}

fn report(json: bool, summary: Option<ChangeSummary>, stats: &RunStats) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&Report { summary, stats })?);
        return Ok(());
    }
    match summary {
        Some(summary) if summary.is_empty() => println!("No changes"),
        Some(summary) => {
            for (key, change) in &summary {
                println!("{}: {}", key, change);
            }
        }
        None => {}
    }
    stats.print();
    Ok(())
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
