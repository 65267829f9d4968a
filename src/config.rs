//! Environment-driven configuration and collaborator construction.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use tracing::info;

use crate::capture::chrome::ChromeLaunch;
use crate::capture::{CaptureSettings, ViewerProfile};
use crate::catalog::client::DEFAULT_API_URL;
use crate::database_ops::DEFAULT_ITEMS_TABLE;
use crate::enrichment::{ContentEnricher, DisabledEnricher, OpenAiEnricher};
use crate::orchestrator::{parse_targets, RunSettings, Target};
use crate::storage::mega::{MegaConfig, MegaStorage, TokioCommandRunner};
use crate::storage::s3::{S3Config, S3Storage};
use crate::storage::supabase::{SupabaseConfig, SupabaseStorage};
use crate::storage::{RetryPolicy, StorageBackend};
use crate::util::env::{env_flag, env_opt, env_parse, env_req};

pub const DEFAULT_TARGETS: &str = "FANZA:doujin:digital_doujin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageChoice {
    Supabase,
    S3,
    Mega,
}

impl FromStr for StorageChoice {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "supabase" => Ok(Self::Supabase),
            "s3" | "storj" => Ok(Self::S3),
            "mega" => Ok(Self::Mega),
            other => bail!("unknown storage backend {other:?} (supabase|s3|mega)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub catalog_url: String,
    pub api_id: String,
    pub affiliate_id: String,
    pub targets: Vec<Target>,
    pub run: RunSettings,
    pub storage: StorageChoice,
    pub retry: RetryPolicy,
    pub items_table: String,
    pub openai_key: Option<String>,
    pub openai_model: Option<String>,
    pub openai_base_url: Option<String>,
    pub capture: CaptureSettings,
    pub viewer_profile: ViewerProfile,
    pub chrome: ChromeLaunch,
}

impl HarvestConfig {
    pub fn from_env() -> Result<Self> {
        let targets = parse_targets(
            &env_opt("HARVEST_TARGETS").unwrap_or_else(|| DEFAULT_TARGETS.to_string()),
        )?;
        let storage = env_opt("HARVEST_STORAGE")
            .map(|s| s.parse())
            .transpose()?
            .unwrap_or(StorageChoice::Supabase);

        let run = RunSettings {
            hits: env_parse("HARVEST_HITS", 10u32),
            top_k: env_parse("HARVEST_TOP_K", 10usize),
            sort: env_opt("HARVEST_SORT").unwrap_or_else(|| "rank".to_string()),
            min_sample_count: env_parse("HARVEST_MIN_SAMPLES", 10u32),
            capture: env_flag("HARVEST_CAPTURE", true),
            trailers: env_flag("HARVEST_TRAILERS", false),
            work_root: env_opt("HARVEST_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
        };

        let capture = CaptureSettings {
            age_gate_timeout: Duration::from_secs(env_parse("VIEWER_AGE_GATE_TIMEOUT_SECS", 5u64)),
            ready_timeout: Duration::from_secs(env_parse("VIEWER_READY_TIMEOUT_SECS", 30u64)),
            settle: Duration::from_millis(env_parse("VIEWER_SETTLE_MS", 1500u64)),
            max_pages: env_parse("VIEWER_MAX_PAGES", 500usize),
            diagnostics_dir: env_opt("HARVEST_DIAGNOSTICS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("logs/diagnostics")),
            ..CaptureSettings::default()
        };
        let viewer_profile = match env_opt("VIEWER_PROFILE") {
            Some(path) => ViewerProfile::from_json_file(PathBuf::from(path).as_path())?,
            None => ViewerProfile::default(),
        };

        Ok(Self {
            catalog_url: env_opt("CATALOG_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_id: env_req("DMM_API_ID")?,
            affiliate_id: env_req("DMM_AFFILIATE_ID")?,
            targets,
            run,
            storage,
            retry: retry_policy_from_env(),
            items_table: env_opt("HARVEST_ITEMS_TABLE")
                .unwrap_or_else(|| DEFAULT_ITEMS_TABLE.to_string()),
            openai_key: env_opt("OPENAI_API_KEY"),
            openai_model: env_opt("OPENAI_MODEL"),
            openai_base_url: env_opt("OPENAI_BASE_URL"),
            capture,
            viewer_profile,
            chrome: ChromeLaunch {
                headless: env_flag("HARVEST_HEADLESS", true),
                executable: env_opt("CHROME_EXECUTABLE").map(PathBuf::from),
            },
        })
    }

    pub fn enricher(&self) -> Result<Arc<dyn ContentEnricher>> {
        match &self.openai_key {
            Some(key) => Ok(Arc::new(OpenAiEnricher::new(
                key.clone(),
                self.openai_model.clone(),
                self.openai_base_url.clone(),
            )?)),
            None => {
                info!("OPENAI_API_KEY not set; generated copy disabled");
                Ok(Arc::new(DisabledEnricher))
            }
        }
    }
}

pub fn retry_policy_from_env() -> RetryPolicy {
    RetryPolicy {
        attempts: env_parse("STORAGE_RETRY_ATTEMPTS", 3u32),
        backoff: Duration::from_millis(env_parse("STORAGE_RETRY_BACKOFF_MS", 1000u64)),
    }
}

pub fn supabase_config_from_env() -> Result<SupabaseConfig> {
    Ok(SupabaseConfig {
        url: env_req("SUPABASE_URL")?,
        key: env_req("SUPABASE_KEY")?,
        bucket: env_opt("SUPABASE_BUCKET").unwrap_or_else(|| "dmm-images".to_string()),
    })
}

pub fn s3_config_from_env() -> Result<S3Config> {
    Ok(S3Config {
        bucket: env_req("S3_BUCKET")?,
        region: env_opt("S3_REGION").unwrap_or_else(|| "ap-northeast-1".to_string()),
        endpoint: env_opt("S3_ENDPOINT"),
        access_key_id: env_req("S3_ACCESS_KEY")?,
        secret_access_key: env_req("S3_SECRET_KEY")?,
        presign_ttl: Duration::from_secs(env_parse("S3_PRESIGN_SECS", 3600u64)),
    })
}

pub fn mega_config_from_env() -> Result<MegaConfig> {
    Ok(MegaConfig {
        email: env_req("MEGA_EMAIL")?,
        password: env_req("MEGA_PASSWORD")?,
        cmd_dir: env_opt("MEGA_CMD_DIR").map(PathBuf::from),
    })
}

/// Env keys each backend needs, for preflight checks.
pub fn required_storage_env(choice: StorageChoice) -> &'static [&'static str] {
    match choice {
        StorageChoice::Supabase => &["SUPABASE_URL", "SUPABASE_KEY"],
        StorageChoice::S3 => &["S3_BUCKET", "S3_ACCESS_KEY", "S3_SECRET_KEY"],
        StorageChoice::Mega => &["MEGA_EMAIL", "MEGA_PASSWORD"],
    }
}

pub fn build_backend(choice: StorageChoice) -> Result<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match choice {
        StorageChoice::Supabase => Arc::new(
            SupabaseStorage::new(supabase_config_from_env()?).context("supabase storage")?,
        ),
        StorageChoice::S3 => Arc::new(S3Storage::new(s3_config_from_env()?).context("s3 storage")?),
        StorageChoice::Mega => Arc::new(
            MegaStorage::new(mega_config_from_env()?, Arc::new(TokioCommandRunner))
                .context("mega storage")?,
        ),
    };
    info!(backend = backend.name(), "storage backend ready");
    Ok(backend)
}
