use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::{env, path::PathBuf, str::FromStr, time::Duration};

use crate::{
    client::{
        retry::RetryPolicy,
        uploader::{ChunkSizePolicy, UploadMetadata, UploaderConfig},
    },
    services::upload_service::UploadLimits,
};

const ENV_PREFIX: &str = "UPLOAD_SERVICE_";

/// Where upload sessions live between requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionBackend {
    Sqlite,
    Memory,
}

impl FromStr for SessionBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown session store `{}` (expected sqlite or memory)", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Development,
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" => Ok(Self::Development),
            other => bail!("unknown environment `{}`", other),
        }
    }
}

/// Centralized server configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub temp_dir: String,
    pub database_url: String,
    pub session_store: SessionBackend,
    pub public_base_url: String,
    pub chunk_size: u64,
    pub max_upload_size: u64,
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub environment: Environment,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Resumable chunked upload service")]
pub struct Args {
    /// Host to bind to (overrides UPLOAD_SERVICE_HOST)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port to bind to (overrides UPLOAD_SERVICE_PORT)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Directory where finished artifacts are stored (overrides UPLOAD_SERVICE_STORAGE_DIR)
    #[arg(long, global = true)]
    pub storage_dir: Option<String>,

    /// Directory for staged chunks (overrides UPLOAD_SERVICE_TEMP_DIR)
    #[arg(long, global = true)]
    pub temp_dir: Option<String>,

    /// Database URL (overrides UPLOAD_SERVICE_DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// `sqlite` or `memory` (overrides UPLOAD_SERVICE_SESSION_STORE)
    #[arg(long, global = true)]
    pub session_store: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Apply the session schema and exit
    Migrate,
    /// Upload a file to a running server
    Upload(UploadArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct UploadArgs {
    /// File to upload
    pub file: PathBuf,

    /// Server base URL
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    pub server: String,

    #[arg(long)]
    pub title: Option<String>,

    /// Tag to attach; repeatable
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Preferred chunk size in bytes
    #[arg(long)]
    pub chunk_size: Option<u64>,

    /// Attempts per request, including the first
    #[arg(long, default_value_t = 4)]
    pub max_attempts: u32,

    #[arg(long)]
    pub content_type: Option<String>,
}

impl UploadArgs {
    pub fn uploader_config(&self) -> UploaderConfig {
        let mut chunk_policy = ChunkSizePolicy::default();
        if let Some(size) = self.chunk_size {
            chunk_policy.default_size = size;
            chunk_policy.min_size = chunk_policy.min_size.min(size);
        }
        UploaderConfig {
            server_url: self.server.clone(),
            chunk_policy,
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                ..RetryPolicy::default()
            },
            ..UploaderConfig::default()
        }
    }

    pub fn metadata(&self) -> UploadMetadata {
        UploadMetadata {
            title: self.title.clone(),
            tags: self.tags.clone(),
            content_type: self.content_type.clone(),
        }
    }
}

fn env_key(name: &str) -> String {
    format!("{}{}", ENV_PREFIX, name)
}

fn env_or(name: &str, default: &str) -> String {
    env::var(env_key(name)).unwrap_or_else(|_| default.into())
}

/// Parse `UPLOAD_SERVICE_<name>` or fall back to `default` when unset.
fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let key = env_key(name);
    match env::var(&key) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the command to run.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env_or("HOST", "0.0.0.0");
        let env_port = env_parse("PORT", 3000u16)?;
        let env_storage = env_or("STORAGE_DIR", "./data/uploads");
        let env_temp = env_or("TEMP_DIR", "./data/chunks");
        let env_db = env_or("DATABASE_URL", "sqlite://./data/meta/sessions.db");
        let env_store = env_parse("SESSION_STORE", SessionBackend::Sqlite)?;

        let defaults = UploadLimits::default();

        // --- Merge ---
        let session_store = match args.session_store {
            Some(raw) => raw.parse()?,
            None => env_store,
        };
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            temp_dir: args.temp_dir.unwrap_or(env_temp),
            database_url: args.database_url.unwrap_or(env_db),
            session_store,
            public_base_url: env_or("PUBLIC_BASE_URL", "/files"),
            chunk_size: env_parse("CHUNK_SIZE", defaults.chunk_size)?,
            max_upload_size: env_parse("MAX_UPLOAD_SIZE", defaults.max_upload_size)?,
            idle_timeout_secs: env_parse("IDLE_TIMEOUT_SECS", 3600u64)?,
            sweep_interval_secs: env_parse("SWEEP_INTERVAL_SECS", 300u64)?,
            environment: env_parse("ENVIRONMENT", Environment::Production)?,
        };

        Ok((cfg, args.command.unwrap_or(Command::Serve)))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Service limits with the configured overrides applied.
    pub fn limits(&self) -> Result<UploadLimits> {
        let defaults = UploadLimits::default();
        let idle_timeout = i64::try_from(self.idle_timeout_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .with_context(|| {
                format!(
                    "{} value `{}` is out of range",
                    env_key("IDLE_TIMEOUT_SECS"),
                    self.idle_timeout_secs
                )
            })?;
        Ok(UploadLimits {
            chunk_size: self
                .chunk_size
                .clamp(defaults.min_chunk_size, defaults.max_chunk_size),
            max_upload_size: self.max_upload_size,
            idle_timeout,
            ..defaults
        })
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AppConfig {
        AppConfig {
            host: "0.0.0.0".into(),
            port: 3000,
            storage_dir: "./data/uploads".into(),
            temp_dir: "./data/chunks".into(),
            database_url: "sqlite::memory:".into(),
            session_store: SessionBackend::Memory,
            public_base_url: "/files".into(),
            chunk_size: 5 * 1024 * 1024,
            max_upload_size: 1024,
            idle_timeout_secs: 60,
            sweep_interval_secs: 0,
            environment: Environment::Development,
        }
    }

    #[test]
    fn test_limits_from_config() {
        let cfg = sample();
        let limits = cfg.limits().unwrap();
        assert_eq!(limits.max_upload_size, 1024);
        assert_eq!(limits.idle_timeout, chrono::Duration::seconds(60));
        assert_eq!(cfg.sweep_interval(), Duration::from_secs(1));
        assert_eq!(cfg.addr(), "0.0.0.0:3000");

        let tiny = AppConfig {
            chunk_size: 10,
            ..sample()
        };
        assert_eq!(tiny.limits().unwrap().chunk_size, 1024 * 1024);
    }

    #[test]
    fn test_huge_idle_timeout_is_rejected() {
        let cfg = AppConfig {
            idle_timeout_secs: u64::MAX,
            ..sample()
        };
        assert!(cfg.limits().is_err());

        let cfg = AppConfig {
            idle_timeout_secs: i64::MAX as u64 / 1000 + 1,
            ..sample()
        };
        let err = cfg.limits().unwrap_err();
        assert!(err.to_string().contains("UPLOAD_SERVICE_IDLE_TIMEOUT_SECS"));
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("SQLite".parse::<SessionBackend>().unwrap(), SessionBackend::Sqlite);
        assert_eq!("memory".parse::<SessionBackend>().unwrap(), SessionBackend::Memory);
        assert!("redis".parse::<SessionBackend>().is_err());
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Development);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_upload_subcommand() {
        let args = Args::try_parse_from([
            "upload-service",
            "upload",
            "clip.mp4",
            "--tag",
            "a",
            "--tag",
            "b",
            "--chunk-size",
            "65536",
        ])
        .unwrap();
        let Some(Command::Upload(upload)) = args.command else {
            panic!("expected upload subcommand");
        };
        assert_eq!(upload.tags, vec!["a".to_string(), "b".to_string()]);
        let cfg = upload.uploader_config();
        assert_eq!(cfg.chunk_policy.default_size, 65536);
        assert_eq!(cfg.chunk_policy.min_size, 65536);
        assert_eq!(cfg.retry.max_attempts, 4);
        assert_eq!(upload.metadata().tags.len(), 2);
    }

    #[test]
    fn test_default_command_is_serve() {
        let args = Args::try_parse_from(["upload-service", "--port", "8080"]).unwrap();
        assert!(args.command.is_none());
        assert_eq!(args.port, Some(8080));
    }
}
