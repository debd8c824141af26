use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Snapshot of per-key versions taken by [`KeyValueStore::watch`].
///
/// Passed back to [`KeyValueStore::exec`], which commits its writes only if
/// none of the watched keys changed in between. Absent keys are watched
/// too: creating one invalidates the token.
#[derive(Debug, Clone)]
pub struct WatchToken {
    pub(crate) store_id: u64,
    pub(crate) versions: Vec<(String, u64)>,
}

impl WatchToken {
    /// The keys this token is watching.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.versions.iter().map(|(k, _)| k.as_str())
    }
}

/// One write inside an atomic transaction.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// SET key value [EX ttl].
    Set {
        key: String,
        value: Vec<u8>,
        ttl: Option<Duration>,
    },
    /// DEL key.
    Delete { key: String },
    /// XADD stream, so a stream entry can commit atomically with domain
    /// writes.
    Append { stream: String, value: Vec<u8> },
}

impl WriteOp {
    /// SET without expiry.
    pub fn set(key: impl Into<String>, value: Vec<u8>) -> Self {
        WriteOp::Set {
            key: key.into(),
            value,
            ttl: None,
        }
    }

    /// SET with expiry.
    pub fn set_ex(key: impl Into<String>, value: Vec<u8>, ttl: Duration) -> Self {
        WriteOp::Set {
            key: key.into(),
            value,
            ttl: Some(ttl),
        }
    }

    /// Stream append.
    pub fn append(stream: impl Into<String>, value: Vec<u8>) -> Self {
        WriteOp::Append {
            stream: stream.into(),
            value,
        }
    }
}

/// Result of an optimistic transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// All writes applied atomically.
    Committed,
    /// A watched key changed; nothing was applied. Re-watch, re-read, retry.
    Conflict,
}

impl ExecOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, ExecOutcome::Committed)
    }
}

/// The store capabilities the checkout services require.
///
/// Semantics mirror the redis command set the services were designed
/// against: `GET`, `SET key value [EX ttl]`, `MSET`, `DEL`,
/// `WATCH`/`MULTI`/`EXEC`, and `XADD`/`XREAD BLOCK` on named streams.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads a key. Expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Writes a key, optionally with a TTL.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Writes several keys in one shot, no TTL.
    async fn mset(&self, pairs: Vec<(String, Vec<u8>)>) -> Result<()>;

    /// Deletes a key.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Snapshots the versions of `keys` for a later [`exec`](Self::exec).
    async fn watch(&self, keys: &[String]) -> Result<WatchToken>;

    /// Atomically applies `writes` iff no watched key changed since the
    /// token was taken.
    async fn exec(&self, token: WatchToken, writes: Vec<WriteOp>) -> Result<ExecOutcome>;

    /// Appends an entry to a stream, returning its entry id.
    async fn append(&self, stream: &str, value: Vec<u8>) -> Result<String>;

    /// Returns the first entry of a stream, blocking until one exists or
    /// the timeout elapses (`None`).
    async fn read_blocking(&self, stream: &str, timeout: Duration) -> Result<Option<Vec<u8>>>;

    /// Drops a whole stream.
    async fn delete_stream(&self, stream: &str) -> Result<()>;
}
