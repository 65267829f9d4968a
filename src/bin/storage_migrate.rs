//! storage_migrate.rs
//! Copies every object in the Supabase bucket into another storage backend.
//! Usage:
//!   SUPABASE_URL=... SUPABASE_KEY=... S3_BUCKET=... cargo run --bin storage_migrate -- --dest s3
//! Objects already present at the destination are skipped, so reruns resume.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info};

use catalog_harvest::config::{
    build_backend, required_storage_env, retry_policy_from_env, supabase_config_from_env,
    StorageChoice,
};
use catalog_harvest::migrate::StorageMigrator;
use catalog_harvest::storage::supabase::SupabaseStorage;
use catalog_harvest::tracing::{init_tracing, DEFAULT_FILTER};
use catalog_harvest::util::env as env_util;

#[derive(Parser, Debug)]
#[command(name = "storage_migrate", version, about = "Copy the Supabase bucket to another backend")]
struct Cli {
    /// Destination backend
    #[arg(long, value_enum, default_value = "s3")]
    dest: StorageChoice,
}

async fn migrate(dest: StorageChoice) -> Result<bool> {
    if dest == StorageChoice::Supabase {
        bail!("destination must differ from the Supabase source");
    }
    let mut required = vec!["SUPABASE_URL", "SUPABASE_KEY"];
    required.extend_from_slice(required_storage_env(dest));
    env_util::preflight_check(
        "storage_migrate",
        &required,
        &["SUPABASE_URL", "SUPABASE_BUCKET", "S3_ENDPOINT", "S3_BUCKET", "MEGA_EMAIL"],
    )?;

    let source = Arc::new(SupabaseStorage::new(supabase_config_from_env()?).context("supabase source")?);
    let dest_backend = build_backend(dest)?;
    let migrator = StorageMigrator::new(source, dest_backend, retry_policy_from_env());
    let summary = migrator.run().await.context("listing source bucket")?;
    info!(
        migrated = summary.migrated,
        skipped = summary.skipped,
        failed = summary.failed,
        "migration finished"
    );
    println!("{summary}");
    Ok(summary.failed == 0)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_util::init_env();
    init_tracing(DEFAULT_FILTER)?;
    let cli = Cli::parse();

    match migrate(cli.dest).await {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!(error = ?e, "migration aborted");
            std::process::exit(1);
        }
    }
}
