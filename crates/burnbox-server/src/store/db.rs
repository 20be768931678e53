use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use tokio::{task::JoinHandle, time};
use tracing::{debug, info, warn};

use super::model::{self, SecretRecord};

const SECRETS: TableDefinition<&str, &[u8]> = TableDefinition::new("secrets");

/// Outcome of [`SecretStore::insert`].
#[derive(Debug, PartialEq)]
pub enum InsertResult {
    Inserted,
    /// A live record already uses this token. Nothing was written.
    DuplicateToken,
}

/// Outcome of [`SecretStore::take`].
#[derive(Debug)]
pub enum TakeResult {
    /// The record existed and has been removed.
    Taken(SecretRecord),
    /// Unknown token, already taken, or past `expire_at`.
    NotFound,
    /// Bytes were present but did not decode. They have been removed.
    Corrupt,
}

/// Persistence contract the vault needs.
///
/// Implementations are cheap to clone and share state between clones.
/// Calls are synchronous; async callers run them on the blocking pool.
pub trait SecretStore: Clone + Send + Sync + 'static {
    /// Insert `record` under `token`. Never overwrites an existing record.
    fn insert(&self, token: &str, record: &SecretRecord) -> Result<InsertResult>;

    /// Atomically remove and return the record stored under `token`.
    ///
    /// Of any number of concurrent calls for one token, at most one observes
    /// `Taken`; the rest observe `NotFound`.
    fn take(&self, token: &str) -> Result<TakeResult>;

    /// Remove every record whose `expire_at` has passed. Returns the count removed.
    fn prune(&self) -> Result<usize>;

    /// Register time-based expiry: a background task calls `prune()` every `interval`.
    fn spawn_sweep(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.tick().await; // skip first immediate tick
            loop {
                ticker.tick().await;
                let store = self.clone();
                match tokio::task::spawn_blocking(move || store.prune()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(error = %e, "background sweep error"),
                    Err(e) => warn!(error = %e, "background sweep task failed"),
                }
            }
        })
    }
}

/// Thread-safe handle to the redb store.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).context("open redb database")?;

        let write_txn = db.begin_write()?;
        write_txn.open_table(SECRETS)?;
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Number of stored records, expired or not.
    pub fn len(&self) -> Result<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SECRETS)?;
        Ok(table.len()?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    #[cfg(test)]
    pub(crate) fn put_raw(&self, token: &str, bytes: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SECRETS)?;
            table.insert(token, bytes)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

impl SecretStore for Store {
    fn insert(&self, token: &str, record: &SecretRecord) -> Result<InsertResult> {
        let bytes = model::encode(record)?;

        let write_txn = self.db.begin_write()?;
        let result = {
            let mut table = write_txn.open_table(SECRETS)?;
            let exists = table.get(token)?.is_some();
            if exists {
                InsertResult::DuplicateToken
            } else {
                table.insert(token, bytes.as_slice())?;
                InsertResult::Inserted
            }
        };
        write_txn.commit()?;

        debug!(token = %super::token::hint(token), ?result, "insert secret");
        Ok(result)
    }

    fn take(&self, token: &str) -> Result<TakeResult> {
        let now = now();

        // redb serializes write transactions, so remove-and-return is the
        // single point where concurrent takers are ordered.
        let write_txn = self.db.begin_write()?;
        let raw_bytes: Option<Vec<u8>> = {
            let mut table = write_txn.open_table(SECRETS)?;
            let removed = table.remove(token)?.map(|guard| guard.value().to_vec());
            removed
        };
        write_txn.commit()?;

        let Some(bytes) = raw_bytes else {
            return Ok(TakeResult::NotFound);
        };

        match model::decode(&bytes) {
            Ok(record) if record.is_expired(now) => {
                debug!(token = %super::token::hint(token), "lazy-evicted expired secret");
                Ok(TakeResult::NotFound)
            }
            Ok(record) => Ok(TakeResult::Taken(record)),
            Err(e) => {
                warn!(token = %super::token::hint(token), error = %e, "removed undecodable record");
                Ok(TakeResult::Corrupt)
            }
        }
    }

    fn prune(&self) -> Result<usize> {
        let now = now();

        // Collect expired tokens in a read pass first.
        let doomed: Vec<String> = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(SECRETS)?;
            let mut tokens = Vec::new();
            for item in table.iter()? {
                let (k, v) = item?;
                match model::decode(v.value()) {
                    Ok(record) if record.is_expired(now) => tokens.push(k.value().to_owned()),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "pruning undecodable record");
                        tokens.push(k.value().to_owned());
                    }
                }
            }
            tokens
        };

        if doomed.is_empty() {
            return Ok(0);
        }

        // Records may have been taken since the read pass; removing a missing
        // key is a no-op.
        let write_txn = self.db.begin_write()?;
        let mut removed = 0usize;
        {
            let mut table = write_txn.open_table(SECRETS)?;
            for token in &doomed {
                if table.remove(token.as_str())?.is_some() {
                    removed += 1;
                }
            }
        }
        write_txn.commit()?;

        if removed > 0 {
            info!(removed, "pruned expired secrets");
        }
        Ok(removed)
    }
}

/// Current Unix time in seconds.
pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
