//! Application bootstrap: environment configuration, logging, service
//! wiring, and the serve loop.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use pomar_api::{ApiServer, ApiState, BuildInfo};
use pomar_auth::{DEFAULT_POW_DIFFICULTY, PowGate, clamp_difficulty};
use pomar_blob::FsBlobStore;
use pomar_core::CleanupSettings;
use pomar_pipeline::CdnPipeline;
use pomar_store::{StoreSettings, TaskStore};
use regex::Regex;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::{AppError, AppResult};
use crate::schedule::spawn_janitor_schedule;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_DATA_DIR: &str = "data";

/// Environment-derived configuration for the binary.
pub(crate) struct AppConfig {
    bind_addr: SocketAddr,
    data_dir: PathBuf,
    db_path: PathBuf,
    cleanup_defaults: CleanupSettings,
    pow_difficulty: u8,
    cdn_domain: Option<String>,
    build: BuildInfo,
}

fn env_or(name: &str, fallback: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| fallback.to_string())
}

impl AppConfig {
    pub(crate) fn from_env() -> AppResult<Self> {
        let bind_addr: SocketAddr = env_or("POMAR_BIND_ADDR", DEFAULT_BIND_ADDR)
            .parse()
            .map_err(|_| AppError::InvalidConfig {
                field: "POMAR_BIND_ADDR",
                reason: "not a socket address",
                value: std::env::var("POMAR_BIND_ADDR").ok(),
            })?;

        let data_dir = PathBuf::from(env_or("POMAR_DATA_DIR", DEFAULT_DATA_DIR));
        let db_path = std::env::var("POMAR_DB_PATH")
            .map_or_else(|_| data_dir.join("pomar.db"), PathBuf::from);

        let cleanup_defaults = CleanupSettings {
            auto_cleanup_days: parse_env_number("AUTO_CLEANUP_DAYS")?,
            auto_cleanup_max_mb: parse_env_number("AUTO_CLEANUP_MAX_MB")?,
        };

        let pow_difficulty = std::env::var("POW_DIFFICULTY")
            .ok()
            .and_then(|value| value.parse().ok())
            .map_or(DEFAULT_POW_DIFFICULTY, clamp_difficulty);

        let cdn_domain = match std::env::var("R2_CDN_DOMAIN") {
            Ok(domain) if !domain.is_empty() => {
                let pattern = Regex::new(r"^[\w.-]+$").expect("domain pattern is valid");
                if !pattern.is_match(&domain) {
                    return Err(AppError::InvalidConfig {
                        field: "R2_CDN_DOMAIN",
                        reason: "not a plain domain name",
                        value: Some(domain),
                    });
                }
                Some(domain)
            }
            _ => None,
        };

        Ok(Self {
            bind_addr,
            data_dir,
            db_path,
            cleanup_defaults,
            pow_difficulty,
            cdn_domain,
            build: BuildInfo {
                commit: env_or("BUILD_COMMIT", "unknown"),
                date: env_or("BUILD_DATE", "unknown"),
            },
        })
    }
}

fn parse_env_number<T: std::str::FromStr + Default>(name: &'static str) -> AppResult<T> {
    match std::env::var(name) {
        Err(_) => Ok(T::default()),
        Ok(raw) => raw.parse().map_err(|_| AppError::InvalidConfig {
            field: name,
            reason: "not a non-negative integer",
            value: Some(raw),
        }),
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Entry point for the application boot sequence.
///
/// # Errors
///
/// Returns an error if configuration, storage, or server startup fails.
pub async fn run_app() -> AppResult<()> {
    init_logging();
    let config = AppConfig::from_env()?;
    info!(
        bind_addr = %config.bind_addr,
        data_dir = %config.data_dir.display(),
        "pomar bootstrap starting"
    );

    let blob = Arc::new(
        FsBlobStore::open(config.data_dir.join("blobs"))
            .await
            .map_err(|err| AppError::blob("blob_store.open", err))?,
    );

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| AppError::Io {
            operation: "db_dir.create",
            source,
        })?;
    }
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(&config.db_path)
                .create_if_missing(true),
        )
        .await
        .map_err(|err| AppError::db("db_pool.connect", err))?;

    let pipeline = Arc::new(CdnPipeline::new(
        Arc::clone(&blob) as Arc<dyn pomar_blob::BlobStore>
    ));
    let store = TaskStore::spawn(
        pool,
        Arc::clone(&blob) as Arc<dyn pomar_blob::BlobStore>,
        pipeline,
        StoreSettings {
            cleanup_defaults: config.cleanup_defaults,
        },
    )
    .await
    .map_err(|err| AppError::store("task_store.spawn", err))?;

    let janitor = spawn_janitor_schedule(store.clone());

    let state = ApiState::new(
        store,
        blob,
        PowGate::new(config.pow_difficulty),
        config.cdn_domain,
        config.build,
    );
    let server = ApiServer::new(state);

    let serve_result = server.serve(config.bind_addr).await;

    if !janitor.is_finished() {
        janitor.abort();
    }

    serve_result.map_err(|err| AppError::api_server("api_server.serve", err))?;
    info!("api server shutdown complete");
    Ok(())
}
