use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use reel_vault::{
    config::{AppConfig, StorageBackend},
    metadata::{MetadataStore, SqliteMetadataStore},
    routes::routes::{RouterOptions, app},
    services::registry::{MediaRegistry, ReconcileOptions, RegistrySettings},
    state::AppState,
    storage::{LocalObjectStore, ObjectStore, S3ObjectStore, UrlSigner},
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("reel_vault=info,tower_http=info")),
        )
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting reel-vault with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if !db_path.starts_with(":memory:") {
        // Create parent directory if needed
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating database directory {:?}", parent))?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
    }

    let connect_options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database url `{}`", db_url))?
        .create_if_missing(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("connecting to {}", db_url))?,
    );
    let metadata = SqliteMetadataStore::new(db);

    // --- Handle migration mode ---
    metadata.migrate().await?;
    if mode.migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize object store ---
    let (objects, local) = build_object_store(&cfg)?;

    let settings = RegistrySettings {
        media_bucket: cfg.media_bucket.clone(),
        poster_bucket: cfg.poster_bucket.clone(),
        public_base_url: cfg.public_base_url.clone(),
        stream_url_ttl: cfg.stream_url_ttl,
        poster_url_ttl: cfg.poster_url_ttl,
        stream_content_type: cfg.stream_content_type.clone(),
    };
    let metadata: Arc<dyn MetadataStore> = Arc::new(metadata);
    let registry = MediaRegistry::new(objects, metadata, settings);

    // --- Handle reconcile mode ---
    if mode.reconcile {
        let report = registry
            .reconcile(ReconcileOptions {
                grace: cfg.orphan_grace,
                dry_run: mode.dry_run,
            })
            .await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    registry.ensure_buckets(cfg.public_read).await?;

    // --- Build router ---
    let router = app(
        AppState::new(registry, local),
        &RouterOptions {
            cors_origin: cfg.cors_origin.clone(),
            max_upload_bytes: cfg.max_upload_bytes,
        },
    )?;

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router).await?;

    Ok(())
}

/// Construct the configured backend. The local store is returned separately
/// so the router can serve its signed downloads.
fn build_object_store(
    cfg: &AppConfig,
) -> Result<(Arc<dyn ObjectStore>, Option<LocalObjectStore>)> {
    match cfg.storage_backend {
        StorageBackend::Local => {
            // --- Ensure storage directory exists ---
            if !Path::new(&cfg.storage_dir).exists() {
                fs::create_dir_all(&cfg.storage_dir)?;
                tracing::info!("Created storage directory at {}", cfg.storage_dir);
            }

            let secret = match &cfg.signing_secret {
                Some(secret) => secret.expose().as_bytes().to_vec(),
                None => {
                    tracing::warn!(
                        "REEL_VAULT_SIGNING_SECRET is not set; signed URLs will not survive a restart"
                    );
                    [Uuid::new_v4().into_bytes(), Uuid::new_v4().into_bytes()].concat()
                }
            };
            let store = LocalObjectStore::new(
                &cfg.storage_dir,
                UrlSigner::new(secret, cfg.public_base_url.clone())?,
            );
            Ok((Arc::new(store.clone()), Some(store)))
        }
        StorageBackend::S3 => {
            let s3 = cfg
                .s3
                .as_ref()
                .context("s3 backend selected without s3 settings")?;
            let store =
                S3ObjectStore::new(&s3.endpoint, &s3.region, &s3.access_key, s3.secret_key.expose())?;
            tracing::info!("Using S3 endpoint {}", s3.endpoint);
            Ok((Arc::new(store), None))
        }
    }
}
