use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{error, info};

use catalog_harvest::catalog::{AffiliateCatalogClient, CatalogApi, CatalogQuery};
use catalog_harvest::config::{HarvestConfig, StorageChoice};
use catalog_harvest::orchestrator::parse_targets;
use catalog_harvest::tracing::{init_tracing, DEFAULT_FILTER};
use catalog_harvest::util::env as env_util;

#[derive(Parser, Debug)]
#[command(name = "harvest", version, about = "Catalog acquisition and media harvest")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    // `harvest --top-k 3` works without the explicit `run` subcommand.
    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Command {
    /// Sweep the configured targets and persist new items (default)
    Run(RunArgs),
    /// Query the catalog once and print what would be harvested
    Search(SearchArgs),
}

#[derive(Debug, Default, Args)]
struct RunArgs {
    /// Comma-separated `site:service[:floor]` list; overrides HARVEST_TARGETS
    #[arg(long)]
    targets: Option<String>,
    /// Items requested per target
    #[arg(long)]
    hits: Option<u32>,
    /// Items processed per target
    #[arg(long)]
    top_k: Option<usize>,
    /// Storage backend; overrides HARVEST_STORAGE
    #[arg(long, value_enum)]
    storage: Option<StorageChoice>,
    /// Skip viewer capture
    #[arg(long = "no-capture", action = ArgAction::SetTrue)]
    no_capture: bool,
    /// Download sample trailers
    #[arg(long, action = ArgAction::SetTrue)]
    trailers: bool,
}

#[derive(Debug, Args)]
struct SearchArgs {
    #[arg(long)]
    keyword: Option<String>,
    #[arg(long, default_value = "FANZA")]
    site: String,
    #[arg(long, default_value = "doujin")]
    service: String,
    #[arg(long)]
    floor: Option<String>,
    #[arg(long, default_value_t = 10)]
    hits: u32,
}

fn apply_overrides(cfg: &mut HarvestConfig, args: &RunArgs) -> Result<()> {
    if let Some(raw) = &args.targets {
        cfg.targets = parse_targets(raw)?;
    }
    if let Some(hits) = args.hits {
        cfg.run.hits = hits;
    }
    if let Some(top_k) = args.top_k {
        cfg.run.top_k = top_k;
    }
    if let Some(storage) = args.storage {
        cfg.storage = storage;
    }
    if args.no_capture {
        cfg.run.capture = false;
    }
    if args.trailers {
        cfg.run.trailers = true;
    }
    Ok(())
}

async fn search(cfg: &HarvestConfig, args: SearchArgs) -> Result<()> {
    let client = AffiliateCatalogClient::new(
        Some(&cfg.catalog_url),
        cfg.api_id.clone(),
        cfg.affiliate_id.clone(),
    )?;
    let mut query = CatalogQuery::new(&args.site, &args.service, args.floor.as_deref());
    query.hits = args.hits;
    query.keyword = args.keyword;
    let items = client.fetch_items(&query).await.context("catalog search")?;
    info!(count = items.len(), "search results");
    for item in &items {
        info!(
            content_id = item.content_id.as_deref().unwrap_or("-"),
            samples = item.sample_image_urls.len(),
            viewer = item.viewer_url.is_some(),
            title = %item.title,
            "item"
        );
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_util::init_env();
    init_tracing(DEFAULT_FILTER)?;

    let cli = Cli::parse();
    let mut cfg = match HarvestConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = ?e, "configuration invalid");
            std::process::exit(1);
        }
    };

    let run_args = match cli.command {
        Some(Command::Search(args)) => return search(&cfg, args).await,
        Some(Command::Run(args)) => args,
        None => cli.run,
    };
    if let Err(e) = apply_overrides(&mut cfg, &run_args) {
        error!(error = ?e, "invalid arguments");
        std::process::exit(1);
    }

    let report = match catalog_harvest::run_harvest(&cfg).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = ?e, "harvest could not start");
            std::process::exit(1);
        }
    };
    let inserted: usize = report.targets.iter().map(|t| t.inserted).sum();
    info!(
        targets = report.targets.len(),
        failed_targets = report.failed_targets.len(),
        inserted,
        "harvest finished"
    );
    std::process::exit(report.exit_code());
}
