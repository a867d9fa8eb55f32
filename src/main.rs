//! visual-scraper CLI
//!
//! Runs saved rules against saved HTML pages.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use visual_scraper::dom::{HtmlDocument, Scope};
use visual_scraper::export::Export;
use visual_scraper::replay::{crawl, extract_files};
use visual_scraper::{
    preview, ExtractionRecord, JsonFileStore, MemoryStore, Rule, ScraperConfig,
    SelectorSynthesizer, StateStore,
};

#[derive(Parser)]
#[command(name = "visual-scraper")]
#[command(about = "Extract records from HTML pages with point-and-click rules")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to visual-scraper.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble records from saved pages and export them
    Extract {
        /// Pages to extract, in order
        #[arg(required = true)]
        pages: Vec<PathBuf>,

        /// Rules JSON file (defaults to the stored rules)
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Export directory
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Print the first records one page would yield
    Preview {
        page: PathBuf,

        #[arg(long)]
        rules: Option<PathBuf>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print a selector for the element matched by a probe selector
    Synthesize {
        page: PathBuf,

        /// Any selector matching the element of interest
        target: String,

        /// Make the selector relative to this element
        #[arg(long)]
        scope: Option<String>,
    },

    /// Follow the next button across saved pages, extracting each one
    Crawl {
        /// First page of the crawl
        start: PathBuf,

        #[arg(long)]
        rules: Option<PathBuf>,

        /// Delay between pages in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,

        #[arg(long)]
        max_pages: Option<usize>,

        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ScraperConfig::load(cli.config.as_deref()).context("Config error")?;

    match cli.command {
        Commands::Extract { pages, rules, out } => {
            let rules = load_rules(rules.as_deref(), &config)?;
            let records = extract_files(&rules, &pages)?;
            export(&records, out.as_deref().unwrap_or(&config.export.dir))?;
        }
        Commands::Preview { page, rules, limit } => {
            let rules = load_rules(rules.as_deref(), &config)?;
            let document = read_page(&page)?;
            let records = preview(&rules, &document, limit.unwrap_or(config.preview.limit));
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Commands::Synthesize { page, target, scope } => {
            let document = read_page(&page)?;
            let element = document
                .find(&target)
                .with_context(|| format!("No element matches '{}'", target))?;
            let scope = match scope {
                Some(selector) => Scope::Within(
                    document
                        .find(&selector)
                        .with_context(|| format!("No element matches scope '{}'", selector))?,
                ),
                None => Scope::Document,
            };
            let selector = SelectorSynthesizer::new(config.selector.max_depth)
                .try_synthesize(&document, element, scope)?;
            println!("{}", selector);
        }
        Commands::Crawl {
            start,
            rules,
            delay_ms,
            max_pages,
            out,
        } => {
            let store: Arc<dyn StateStore> = match rules {
                Some(path) => Arc::new(MemoryStore::with_rules(read_rules(&path)?)),
                None => Arc::new(JsonFileStore::new(&config.storage.dir)),
            };
            let records = crawl(
                store,
                &start,
                delay_ms.unwrap_or(config.automation.delay_ms),
                max_pages.unwrap_or(config.replay.max_pages),
            )
            .await?;
            export(&records, out.as_deref().unwrap_or(&config.export.dir))?;
        }
    }

    Ok(())
}

fn read_rules(path: &Path) -> Result<Vec<Rule>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read rules from {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid rules in {}", path.display()))
}

fn load_rules(path: Option<&Path>, config: &ScraperConfig) -> Result<Vec<Rule>> {
    let rules = match path {
        Some(path) => read_rules(path)?,
        None => JsonFileStore::new(&config.storage.dir).load_rules()?,
    };
    if rules.is_empty() {
        bail!("No extraction rules defined");
    }
    Ok(rules)
}

fn read_page(path: &Path) -> Result<HtmlDocument> {
    let source = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(HtmlDocument::parse(&source))
}

fn export(records: &[ExtractionRecord], dir: &Path) -> Result<()> {
    let path = Export::new(records)?.write_to(dir)?;
    println!("{}", path.display());
    Ok(())
}
