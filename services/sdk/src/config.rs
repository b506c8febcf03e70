use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use notes::AccountPrivateKey;

#[derive(Clone, Debug)]
pub struct LockConfig {
    /// SQLite database every contending process opens, e.g.
    /// `sqlite://rollup_sdk_locks.db`.
    pub database_url: String,
    pub expiry: Duration,
    pub ping_interval: Duration,
    pub try_lock_interval: Duration,
}

#[derive(Clone, Debug)]
pub struct SdkConfig {
    pub provider_url: String,
    pub data_path: PathBuf,
    pub sync_poll_interval: Duration,
    pub download_queue_size: usize,
    pub decrypt_threads: usize,
    /// Cross-process lease around world-state writes; off unless
    /// `LOCK_EXPIRY_MS` is set.
    pub lock: Option<LockConfig>,
    pub account_keys: Vec<AccountPrivateKey>,
}

impl SdkConfig {
    pub fn from_env() -> Result<Self> {
        let provider_url = get("ROLLUP_PROVIDER_URL")?;
        let data_path = std::env::var("SDK_DATA_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("rollup_sdk_data.json"));

        let sync_poll_interval = Duration::from_secs(parse_or("SYNC_POLL_SECS", 10)?);
        let download_queue_size = parse_or("DOWNLOAD_QUEUE_SIZE", 10)? as usize;
        let default_threads = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1) as u64;
        let decrypt_threads = parse_or("DECRYPT_THREADS", default_threads)? as usize;

        let lock = match std::env::var("LOCK_EXPIRY_MS") {
            Ok(_) => Some(LockConfig {
                database_url: std::env::var("LOCK_DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://rollup_sdk_locks.db".to_string()),
                expiry: Duration::from_millis(parse_or("LOCK_EXPIRY_MS", 5_000)?),
                ping_interval: Duration::from_millis(parse_or("LOCK_PING_MS", 1_000)?),
                try_lock_interval: Duration::from_millis(parse_or("LOCK_RETRY_MS", 100)?),
            }),
            Err(_) => None,
        };

        let account_keys = match std::env::var("SYNC_ACCOUNT_KEYS") {
            Ok(v) => v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| AccountPrivateKey::from_hex(s).context("SYNC_ACCOUNT_KEYS holds an invalid key"))
                .collect::<Result<Vec<_>>>()?,
            Err(_) => Vec::new(),
        };

        // Tiny sanity checks (fail fast, fail loud)
        if !provider_url.starts_with("http://") && !provider_url.starts_with("https://") {
            bail!("ROLLUP_PROVIDER_URL must start with http:// or https://");
        }
        if download_queue_size == 0 {
            bail!("DOWNLOAD_QUEUE_SIZE must be at least 1");
        }
        if let Some(lock) = &lock {
            if lock.ping_interval >= lock.expiry {
                bail!("LOCK_PING_MS must be shorter than LOCK_EXPIRY_MS");
            }
        }

        Ok(Self {
            provider_url,
            data_path,
            sync_poll_interval,
            download_queue_size,
            decrypt_threads,
            lock,
            account_keys,
        })
    }
}

fn get(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Missing required env var: {key}"))
}

fn parse_or(key: &str, default: u64) -> Result<u64> {
    match std::env::var(key) {
        Ok(v) => v.trim().parse().with_context(|| format!("{key} must be an unsigned integer, got {v:?}")),
        Err(_) => Ok(default),
    }
}
