use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

/// 255 KiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 255 * 1024;
pub const MIN_CHUNK_SIZE: u64 = 1024;
pub const MAX_CHUNK_SIZE: u64 = 16 * 1024 * 1024;
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 4 * 1024 * 1024 * 1024;
const DEFAULT_ORPHAN_GRACE_SECS: u64 = 3600;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub chunk_size: u64,
    pub max_upload_bytes: u64,
    pub orphan_grace: Duration,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Chunked media storage with range streaming")]
pub struct Args {
    /// Host to bind to (overrides MEDIA_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides MEDIA_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where object chunks are stored (overrides MEDIA_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides MEDIA_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Chunk size in bytes; fixed for the lifetime of a store (overrides MEDIA_STORE_CHUNK_SIZE)
    #[arg(long)]
    pub chunk_size: Option<u64>,

    /// Largest accepted upload body in bytes (overrides MEDIA_STORE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<u64>,

    /// Age in seconds before unpublished chunks are purged (overrides MEDIA_STORE_ORPHAN_GRACE_SECS)
    #[arg(long)]
    pub orphan_grace_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |key| env::var(key).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over values from `lookup` (the environment) over defaults.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let cfg = Self {
            host: args
                .host
                .or_else(|| lookup("MEDIA_STORE_HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: pick(args.port, &lookup, "MEDIA_STORE_PORT", 3000)?,
            storage_dir: args
                .storage_dir
                .or_else(|| lookup("MEDIA_STORE_STORAGE_DIR"))
                .unwrap_or_else(|| "./data/chunks".into()),
            database_url: args
                .database_url
                .or_else(|| lookup("MEDIA_STORE_DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/media_store.db".into()),
            chunk_size: pick(
                args.chunk_size,
                &lookup,
                "MEDIA_STORE_CHUNK_SIZE",
                DEFAULT_CHUNK_SIZE,
            )?,
            max_upload_bytes: pick(
                args.max_upload_bytes,
                &lookup,
                "MEDIA_STORE_MAX_UPLOAD_BYTES",
                DEFAULT_MAX_UPLOAD_BYTES,
            )?,
            orphan_grace: Duration::from_secs(pick(
                args.orphan_grace_secs,
                &lookup,
                "MEDIA_STORE_ORPHAN_GRACE_SECS",
                DEFAULT_ORPHAN_GRACE_SECS,
            )?),
        };

        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&cfg.chunk_size) {
            bail!(
                "chunk size {} must be between {} and {} bytes",
                cfg.chunk_size,
                MIN_CHUNK_SIZE,
                MAX_CHUNK_SIZE
            );
        }
        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Upload body limit as a `usize`, saturating on 32-bit targets.
    pub fn upload_limit(&self) -> usize {
        usize::try_from(self.max_upload_bytes).unwrap_or(usize::MAX)
    }
}

/// CLI value, else parsed environment value, else `default`.
fn pick<T>(
    cli: Option<T>,
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(value) = cli {
        return Ok(value);
    }
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_env_or_args() {
        let cfg = AppConfig::resolve(Args::default(), env_of(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(cfg.orphan_grace, Duration::from_secs(3600));
    }

    #[test]
    fn args_override_env() {
        let args = Args {
            port: Some(8080),
            ..Args::default()
        };
        let env = env_of(&[
            ("MEDIA_STORE_PORT", "9000"),
            ("MEDIA_STORE_HOST", "127.0.0.1"),
            ("MEDIA_STORE_CHUNK_SIZE", "1048576"),
        ]);
        let cfg = AppConfig::resolve(args, env).unwrap();
        assert_eq!(cfg.addr(), "127.0.0.1:8080");
        assert_eq!(cfg.chunk_size, 1024 * 1024);
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(AppConfig::resolve(Args::default(), env_of(&[("MEDIA_STORE_PORT", "http")])).is_err());
        assert!(
            AppConfig::resolve(Args::default(), env_of(&[("MEDIA_STORE_CHUNK_SIZE", "16")])).is_err()
        );
    }
}
