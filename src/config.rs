use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, fmt, str::FromStr};

use crate::models::{
    deletion::StrategyMode,
    naming::{PrefixPattern, default_patterns},
    object::MAX_KEYS_PER_REQUEST,
};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub store: StoreConfig,
    pub worker: WorkerConfig,
    pub cleanup: CleanupConfig,
    pub job_store: JobStoreBackend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    S3,
    Memory,
}

/// Connection settings for the S3-compatible bucket.
#[derive(Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub bucket: String,
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible services (MinIO, R2, Spaces).
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Path-style URLs; required by MinIO and some compatible services.
    pub force_path_style: bool,
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("backend", &self.backend)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("force_path_style", &self.force_path_style)
            .finish()
    }
}

/// Remote bulk-deletion worker.
#[derive(Clone)]
pub struct WorkerConfig {
    /// Whether the worker is tried first in `auto` mode.
    pub enabled: bool,
    pub url: Option<String>,
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl WorkerConfig {
    /// The worker is usable at all (enabled or not) when a URL is set.
    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }
}

impl fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("enabled", &self.enabled)
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// When the full-bucket substring scan may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullScanPolicy {
    Disabled,
    /// Only when the caller explicitly asks for it.
    OnRequest,
    /// Whenever prefix enumeration finds nothing, or when asked.
    Automatic,
}

impl FromStr for FullScanPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "disabled" => Ok(FullScanPolicy::Disabled),
            "on_request" => Ok(FullScanPolicy::OnRequest),
            "automatic" => Ok(FullScanPolicy::Automatic),
            other => Err(format!("unknown full scan policy `{other}`")),
        }
    }
}

/// Which tracker rows are removed after a deletion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilePolicy {
    /// Every row of the project, whatever the per-key outcome.
    All,
    /// Only rows whose key the store confirmed deleted.
    ConfirmedOnly,
}

impl FromStr for ReconcilePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "all" => Ok(ReconcilePolicy::All),
            "confirmed_only" => Ok(ReconcilePolicy::ConfirmedOnly),
            other => Err(format!("unknown reconcile policy `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CleanupConfig {
    /// Keys per DeleteObjects call, at most 1000.
    pub batch_size: usize,
    /// Delete batches in flight at once.
    pub delete_concurrency: usize,
    /// Prefix LIST calls in flight at once during discovery.
    pub list_concurrency: usize,
    pub naming_patterns: Vec<PrefixPattern>,
    pub full_scan_policy: FullScanPolicy,
    /// Upper bound on pages read by one full-bucket scan.
    pub full_scan_max_pages: usize,
    /// Pause between full-scan pages.
    pub full_scan_page_delay_ms: u64,
    pub reconcile_policy: ReconcilePolicy,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            batch_size: MAX_KEYS_PER_REQUEST,
            delete_concurrency: 2,
            list_concurrency: 6,
            naming_patterns: default_patterns(),
            full_scan_policy: FullScanPolicy::OnRequest,
            full_scan_max_pages: 100,
            full_scan_page_delay_ms: 0,
            reconcile_policy: ReconcilePolicy::All,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStoreBackend {
    Sqlite,
    Memory,
}

/// What the process should do after configuration is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    Serve,
    Migrate,
    Cleanup {
        project_id: String,
        dry_run: bool,
        mode: StrategyMode,
        allow_full_scan: bool,
    },
    PurgeAll {
        dry_run: bool,
    },
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Project storage reclamation for S3-compatible buckets")]
pub struct Args {
    /// Host to bind to (overrides RECLAIMER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides RECLAIMER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides RECLAIMER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bucket to clean (overrides RECLAIMER_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// S3-compatible endpoint URL (overrides RECLAIMER_S3_ENDPOINT)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Object store backend: s3 or memory (overrides RECLAIMER_STORE_BACKEND)
    #[arg(long)]
    pub store_backend: Option<String>,

    /// Run migrations and exit
    #[arg(long, conflicts_with_all = ["cleanup", "purge_all"])]
    pub migrate: bool,

    /// Clean up a single project and exit
    #[arg(long, value_name = "PROJECT_ID", conflicts_with = "purge_all")]
    pub cleanup: Option<String>,

    /// Purge every object in the bucket and exit
    #[arg(long)]
    pub purge_all: bool,

    /// Report what would be deleted without deleting anything
    #[arg(long)]
    pub dry_run: bool,

    /// Strategy for --cleanup: auto, worker, tracked or pattern
    #[arg(long, default_value = "auto")]
    pub mode: String,

    /// Allow the full-bucket substring scan for --cleanup
    #[arg(long)]
    pub allow_full_scan: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the run mode.
    pub fn from_env_and_args() -> Result<(Self, RunMode)> {
        // Parse CLI once
        let args = Args::parse();
        Self::from_sources(args, |name| env::var(name).ok())
    }

    /// Merge CLI args over the given environment lookup over defaults.
    pub fn from_sources(args: Args, env: impl Fn(&str) -> Option<String>) -> Result<(Self, RunMode)> {
        // --- Environment fallback ---
        let env_host = env("RECLAIMER_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parse_env(&env, "RECLAIMER_PORT", 3000u16)?;
        let env_db = env("RECLAIMER_DATABASE_URL")
            .unwrap_or_else(|| "sqlite://./data/reclaimer.db".into());

        let backend = match args
            .store_backend
            .or_else(|| env("RECLAIMER_STORE_BACKEND"))
            .as_deref()
        {
            None | Some("s3") => StoreBackend::S3,
            Some("memory") => StoreBackend::Memory,
            Some(other) => bail!("unknown store backend `{}` (expected s3 or memory)", other),
        };

        let store = StoreConfig {
            backend,
            bucket: args
                .bucket
                .or_else(|| env("RECLAIMER_BUCKET"))
                .unwrap_or_default(),
            region: env("RECLAIMER_S3_REGION"),
            endpoint: args.endpoint.or_else(|| env("RECLAIMER_S3_ENDPOINT")),
            access_key_id: env("RECLAIMER_S3_ACCESS_KEY_ID"),
            secret_access_key: env("RECLAIMER_S3_SECRET_ACCESS_KEY"),
            force_path_style: parse_env(&env, "RECLAIMER_S3_FORCE_PATH_STYLE", false)?,
        };
        if store.backend == StoreBackend::S3 && store.bucket.is_empty() {
            bail!("RECLAIMER_BUCKET (or --bucket) is required for the s3 backend");
        }

        let worker = WorkerConfig {
            enabled: parse_env(&env, "RECLAIMER_WORKER_ENABLED", false)?,
            url: env("RECLAIMER_WORKER_URL").filter(|u| !u.trim().is_empty()),
            token: env("RECLAIMER_WORKER_TOKEN"),
            timeout_secs: parse_env(&env, "RECLAIMER_WORKER_TIMEOUT_SECS", 120u64)?,
        };
        if worker.enabled && worker.url.is_none() {
            bail!("RECLAIMER_WORKER_ENABLED is set but RECLAIMER_WORKER_URL is missing");
        }

        let defaults = CleanupConfig::default();
        let naming_patterns = match env("RECLAIMER_NAMING_PATTERNS") {
            Some(list) => PrefixPattern::parse_list(&list)
                .with_context(|| format!("parsing RECLAIMER_NAMING_PATTERNS value `{}`", list))?,
            None => defaults.naming_patterns,
        };
        let cleanup = CleanupConfig {
            batch_size: parse_env(&env, "RECLAIMER_BATCH_SIZE", defaults.batch_size)?
                .clamp(1, MAX_KEYS_PER_REQUEST),
            delete_concurrency: parse_env(
                &env,
                "RECLAIMER_DELETE_CONCURRENCY",
                defaults.delete_concurrency,
            )?
            .clamp(1, 4),
            list_concurrency: parse_env(
                &env,
                "RECLAIMER_LIST_CONCURRENCY",
                defaults.list_concurrency,
            )?
            .clamp(1, 8),
            naming_patterns,
            full_scan_policy: parse_env(
                &env,
                "RECLAIMER_FULL_SCAN_POLICY",
                defaults.full_scan_policy,
            )?,
            full_scan_max_pages: parse_env(
                &env,
                "RECLAIMER_FULL_SCAN_MAX_PAGES",
                defaults.full_scan_max_pages,
            )?,
            full_scan_page_delay_ms: parse_env(
                &env,
                "RECLAIMER_FULL_SCAN_PAGE_DELAY_MS",
                defaults.full_scan_page_delay_ms,
            )?,
            reconcile_policy: parse_env(
                &env,
                "RECLAIMER_RECONCILE_POLICY",
                defaults.reconcile_policy,
            )?,
        };

        let job_store = match env("RECLAIMER_JOB_STORE").as_deref() {
            None | Some("sqlite") => JobStoreBackend::Sqlite,
            Some("memory") => JobStoreBackend::Memory,
            Some(other) => bail!("unknown job store `{}` (expected sqlite or memory)", other),
        };

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            store,
            worker,
            cleanup,
            job_store,
        };

        let mode = if args.migrate {
            RunMode::Migrate
        } else if let Some(project_id) = args.cleanup {
            RunMode::Cleanup {
                project_id,
                dry_run: args.dry_run,
                mode: args
                    .mode
                    .parse()
                    .map_err(anyhow::Error::msg)
                    .context("parsing --mode")?,
                allow_full_scan: args.allow_full_scan,
            }
        } else if args.purge_all {
            RunMode::PurgeAll {
                dry_run: args.dry_run,
            }
        } else {
            RunMode::Serve
        };

        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T>(env: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        None => Ok(default),
    }
}
