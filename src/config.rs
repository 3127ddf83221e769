use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, fmt, str::FromStr, time::Duration};

const ENV_PREFIX: &str = "REEL_VAULT_";

/// Which object store backs the buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackend {
    /// Objects on the local filesystem, served by this process.
    Local,
    /// An S3-compatible endpoint such as MinIO.
    S3,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "s3" | "minio" => Ok(Self::S3),
            other => bail!("unknown storage backend `{}` (expected `local` or `s3`)", other),
        }
    }
}

/// A string that is never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\"***\"")
    }
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: Secret,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub storage_backend: StorageBackend,
    pub storage_dir: String,
    /// Present when `storage_backend` is `S3`.
    pub s3: Option<S3Config>,
    pub media_bucket: String,
    pub poster_bucket: String,
    pub public_base_url: String,
    /// `None` means a random per-process secret.
    pub signing_secret: Option<Secret>,
    pub stream_url_ttl: Duration,
    pub poster_url_ttl: Duration,
    pub stream_content_type: Option<String>,
    pub cors_origin: String,
    pub max_upload_bytes: u64,
    pub public_read: bool,
    pub orphan_grace: Duration,
}

/// What the process should do after loading its configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunMode {
    pub migrate: bool,
    pub reconcile: bool,
    pub dry_run: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Movie upload and streaming API")]
pub struct Args {
    /// Host to bind to (overrides REEL_VAULT_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides REEL_VAULT_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides REEL_VAULT_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Object store backend (overrides REEL_VAULT_STORAGE_BACKEND)
    #[arg(long, value_enum)]
    pub storage_backend: Option<StorageBackend>,

    /// Directory for the local backend (overrides REEL_VAULT_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Origin clients use to reach this service (overrides REEL_VAULT_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Remove orphaned blobs and exit
    #[arg(long)]
    pub reconcile: bool,

    /// With --reconcile, report orphans without deleting them
    #[arg(long, requires = "reconcile")]
    pub dry_run: bool,
}

impl AppConfig {
    /// Parse `.env`, environment variables and CLI args into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, RunMode)> {
        // A missing .env is normal.
        let _ = dotenvy::dotenv();
        let args = Args::parse();
        Self::resolve(args, |name| env::var(name).ok())
    }

    /// Merge `args` over the variables returned by `lookup` (unprefixed
    /// names), over the defaults.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<(Self, RunMode)> {
        let var = |name: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|value| !value.trim().is_empty())
        };
        let parsed = |name: &str, default: u64| -> Result<u64> {
            match var(name) {
                Some(value) => value
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("parsing {}{} value `{}`", ENV_PREFIX, name, value)),
                None => Ok(default),
            }
        };

        // --- Environment fallback ---
        let env_port = match var("PORT") {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing {}PORT value `{}`", ENV_PREFIX, value))?,
            None => 8000,
        };
        let env_backend = match var("STORAGE_BACKEND") {
            Some(value) => value.parse::<StorageBackend>()?,
            None => StorageBackend::Local,
        };
        let public_read = match var("PUBLIC_READ").as_deref() {
            None => false,
            Some("1" | "true" | "TRUE" | "yes") => true,
            Some("0" | "false" | "FALSE" | "no") => false,
            Some(other) => bail!("parsing {}PUBLIC_READ value `{}`", ENV_PREFIX, other),
        };

        // --- Merge ---
        let storage_backend = args.storage_backend.unwrap_or(env_backend);
        let s3 = match storage_backend {
            StorageBackend::Local => None,
            StorageBackend::S3 => Some(S3Config {
                endpoint: var("S3_ENDPOINT")
                    .with_context(|| format!("{}S3_ENDPOINT is required for the s3 backend", ENV_PREFIX))?,
                region: var("S3_REGION").unwrap_or_else(|| "us-east-1".into()),
                access_key: var("S3_ACCESS_KEY")
                    .with_context(|| format!("{}S3_ACCESS_KEY is required for the s3 backend", ENV_PREFIX))?,
                secret_key: var("S3_SECRET_KEY")
                    .map(Secret)
                    .with_context(|| format!("{}S3_SECRET_KEY is required for the s3 backend", ENV_PREFIX))?,
            }),
        };

        let cfg = Self {
            host: args.host.or_else(|| var("HOST")).unwrap_or_else(|| "0.0.0.0".into()),
            port: args.port.unwrap_or(env_port),
            database_url: args
                .database_url
                .or_else(|| var("DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/reel_vault.db".into()),
            storage_backend,
            storage_dir: args
                .storage_dir
                .or_else(|| var("STORAGE_DIR"))
                .unwrap_or_else(|| "./data/objects".into()),
            s3,
            media_bucket: var("MEDIA_BUCKET").unwrap_or_else(|| "movies".into()),
            poster_bucket: var("POSTER_BUCKET").unwrap_or_else(|| "posters".into()),
            public_base_url: args
                .public_base_url
                .or_else(|| var("PUBLIC_BASE_URL"))
                .unwrap_or_else(|| "http://localhost:8000".into()),
            signing_secret: var("SIGNING_SECRET").map(Secret),
            stream_url_ttl: Duration::from_secs(parsed("STREAM_URL_TTL_SECS", 600)?),
            poster_url_ttl: Duration::from_secs(parsed("POSTER_URL_TTL_SECS", 3600)?),
            stream_content_type: match lookup(&format!("{}STREAM_CONTENT_TYPE", ENV_PREFIX)) {
                // Explicitly empty disables the override.
                Some(value) if value.trim().is_empty() => None,
                Some(value) => Some(value),
                None => Some("video/mp4".into()),
            },
            cors_origin: var("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".into()),
            max_upload_bytes: parsed("MAX_UPLOAD_BYTES", 5 * 1024 * 1024 * 1024)?,
            public_read,
            orphan_grace: Duration::from_secs(parsed("ORPHAN_GRACE_SECS", 3600)?),
        };

        if cfg.media_bucket == cfg.poster_bucket {
            bail!("media and poster buckets must differ (both `{}`)", cfg.media_bucket);
        }

        let mode = RunMode {
            migrate: args.migrate,
            reconcile: args.reconcile,
            dry_run: args.dry_run,
        };
        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
