//! Lease-based mutex shared across processes
//!
//! A lease is a row `(name, owner, expires_ms)` in a small SQL table. Each
//! claim is one conditional statement, so the database decides who wins even
//! when the contenders live in different processes. Holders renew every
//! `ping_interval`; a lease nobody renews lapses after `expiry` and can be
//! taken over.

use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::LockConfig;
use crate::error::Result;
use crate::serial_queue::QueueError;

#[async_trait]
pub trait LockDb: Send + Sync {
    /// Take the lease if it is free, lapsed or already ours.
    async fn try_acquire(&self, name: &str, owner: &str, expiry: Duration) -> Result<bool>;
    /// Extend a lease we hold. `false` if someone else took it.
    async fn renew(&self, name: &str, owner: &str, expiry: Duration) -> Result<bool>;
    async fn release(&self, name: &str, owner: &str) -> Result<()>;
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn expires_at(expiry: Duration) -> i64 {
    now_ms().saturating_add(i64::try_from(expiry.as_millis()).unwrap_or(i64::MAX))
}

/// [`LockDb`] on a SQLite file that every contending process opens.
pub struct SqlLockDb {
    pool: SqlitePool,
    schema: OnceCell<()>,
}

impl SqlLockDb {
    /// Connections are opened on first use, so this needs no runtime I/O.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new().max_connections(4).connect_lazy_with(options);
        Ok(Self { pool, schema: OnceCell::new() })
    }

    async fn ready(&self) -> Result<&SqlitePool> {
        self.schema
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS sdk_locks (
                      name TEXT PRIMARY KEY,
                      owner TEXT NOT NULL,
                      expires_ms INTEGER NOT NULL
                    )
                    "#,
                )
                .execute(&self.pool)
                .await
                .map(|_| ())
            })
            .await?;
        Ok(&self.pool)
    }
}

#[async_trait]
impl LockDb for SqlLockDb {
    async fn try_acquire(&self, name: &str, owner: &str, expiry: Duration) -> Result<bool> {
        let pool = self.ready().await?;
        let done = sqlx::query(
            r#"
            INSERT INTO sdk_locks (name, owner, expires_ms)
            VALUES (?, ?, ?)
            ON CONFLICT (name) DO UPDATE
            SET owner = excluded.owner,
                expires_ms = excluded.expires_ms
            WHERE sdk_locks.owner = excluded.owner
               OR sdk_locks.expires_ms < ?
            "#,
        )
        .bind(name)
        .bind(owner)
        .bind(expires_at(expiry))
        .bind(now_ms())
        .execute(pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn renew(&self, name: &str, owner: &str, expiry: Duration) -> Result<bool> {
        let pool = self.ready().await?;
        let done = sqlx::query(
            r#"
            UPDATE sdk_locks
            SET expires_ms = ?
            WHERE name = ?
              AND owner = ?
            "#,
        )
        .bind(expires_at(expiry))
        .bind(name)
        .bind(owner)
        .execute(pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn release(&self, name: &str, owner: &str) -> Result<()> {
        let pool = self.ready().await?;
        sqlx::query("DELETE FROM sdk_locks WHERE name = ? AND owner = ?")
            .bind(name)
            .bind(owner)
            .execute(pool)
            .await?;
        Ok(())
    }
}

/// One named lease held on behalf of this process.
pub struct DbMutex {
    db: Arc<dyn LockDb>,
    name: String,
    owner: String,
    config: LockConfig,
    ping: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    destroyed: CancellationToken,
}

impl DbMutex {
    pub fn new(db: Arc<dyn LockDb>, name: impl Into<String>, config: LockConfig) -> Self {
        Self {
            db,
            name: name.into(),
            owner: hex::encode(rand::random::<[u8; 16]>()),
            config,
            ping: Mutex::new(None),
            destroyed: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Retry every `try_lock_interval` until the lease is ours or the mutex
    /// is destroyed.
    pub async fn lock(&self) -> std::result::Result<(), QueueError> {
        loop {
            if self.destroyed.is_cancelled() {
                return Err(QueueError::Lock(format!("mutex {} destroyed", self.name)));
            }
            match self.db.try_acquire(&self.name, &self.owner, self.config.expiry).await {
                Ok(true) => {
                    self.start_ping();
                    debug!(lock = %self.name, owner = %self.owner, "lease acquired");
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => warn!(lock = %self.name, "lease acquire failed: {e}"),
            }
            tokio::select! {
                _ = self.destroyed.cancelled() => {}
                _ = tokio::time::sleep(self.config.try_lock_interval) => {}
            }
        }
    }

    pub async fn unlock(&self) {
        if let Some((token, handle)) = self.take_ping() {
            token.cancel();
            let _ = handle.await;
        }
        if let Err(e) = self.db.release(&self.name, &self.owner).await {
            warn!(lock = %self.name, "lease release failed: {e}");
        }
    }

    /// Wake any pending [`lock`](Self::lock) with an error and stop renewing.
    /// The lease itself lapses on its own.
    pub fn destroy(&self) {
        self.destroyed.cancel();
        if let Some((token, _)) = self.take_ping() {
            token.cancel();
        }
    }

    fn take_ping(&self) -> Option<(CancellationToken, JoinHandle<()>)> {
        match self.ping.lock() {
            Ok(mut p) => p.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn start_ping(&self) {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let db = self.db.clone();
        let name = self.name.clone();
        let owner = self.owner.clone();
        let every = self.config.ping_interval;
        let expiry = self.config.expiry;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(every) => {
                        match db.renew(&name, &owner, expiry).await {
                            Ok(true) => {}
                            Ok(false) => warn!(lock = %name, "lease lost to another owner"),
                            Err(e) => warn!(lock = %name, "lease renew failed: {e}"),
                        }
                    }
                }
            }
        });

        let previous = match self.ping.lock() {
            Ok(mut p) => p.replace((token, handle)),
            Err(poisoned) => poisoned.into_inner().replace((token, handle)),
        };
        if let Some((old, _)) = previous {
            old.cancel();
        }
    }
}
