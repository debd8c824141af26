use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Notify, RwLock};
use tokio::time::Instant;

use crate::error::{Result, StoreError};
use crate::store::{ExecOutcome, KeyValueStore, WatchToken, WriteOp};

static STORE_IDS: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct Inner {
    keys: HashMap<String, Entry>,
    /// Monotonic per-key write counters. Kept separately from `keys` so a
    /// delete-then-recreate still invalidates outstanding watch tokens.
    versions: HashMap<String, u64>,
    streams: HashMap<String, Vec<(String, Vec<u8>)>>,
    stream_seq: u64,
    /// Operations to let through before faults start.
    skip_budget: u32,
    /// Remaining operations that should fail with `Unavailable`.
    fail_budget: u32,
}

impl Inner {
    fn take_fault(&mut self) -> Result<()> {
        if self.skip_budget > 0 {
            self.skip_budget -= 1;
            return Ok(());
        }
        if self.fail_budget > 0 {
            self.fail_budget -= 1;
            return Err(StoreError::Unavailable("injected fault".into()));
        }
        Ok(())
    }

    fn version_of(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn bump(&mut self, key: &str) {
        *self.versions.entry(key.to_string()).or_insert(0) += 1;
    }

    fn live_value(&mut self, key: &str, now: DateTime<Utc>) -> Option<Vec<u8>> {
        if let Some(entry) = self.keys.get(key) {
            if entry.expired(now) {
                self.keys.remove(key);
                self.bump(key);
                return None;
            }
            return Some(entry.value.clone());
        }
        None
    }

    fn put(&mut self, key: &str, value: Vec<u8>, ttl: Option<Duration>, now: DateTime<Utc>) {
        let expires_at = ttl.and_then(|t| chrono::Duration::from_std(t).ok().map(|d| now + d));
        self.keys.insert(key.to_string(), Entry { value, expires_at });
        self.bump(key);
    }

    fn next_entry_id(&mut self, now: DateTime<Utc>) -> String {
        self.stream_seq += 1;
        format!("{}-{}", now.timestamp_millis(), self.stream_seq)
    }

    fn apply_writes(&mut self, writes: Vec<WriteOp>, now: DateTime<Utc>) {
        for write in writes {
            match write {
                WriteOp::Set { key, value, ttl } => self.put(&key, value, ttl, now),
                WriteOp::Delete { key } => {
                    if self.keys.remove(&key).is_some() {
                        self.bump(&key);
                    }
                }
                WriteOp::Append { stream, value } => {
                    let id = self.next_entry_id(now);
                    self.streams.entry(stream).or_default().push((id, value));
                }
            }
        }
    }
}

/// In-memory key-value store.
///
/// Implements the full contract including version-checked optimistic
/// transactions and blocking stream reads, so the services can be composed
/// and tested in one process. TTLs are enforced lazily on read.
#[derive(Clone)]
pub struct InMemoryKvStore {
    id: u64,
    inner: Arc<RwLock<Inner>>,
    stream_notify: Arc<Notify>,
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self {
            id: STORE_IDS.fetch_add(1, Ordering::Relaxed),
            inner: Arc::new(RwLock::new(Inner::default())),
            stream_notify: Arc::new(Notify::new()),
        }
    }
}

impl InMemoryKvStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` operations fail with [`StoreError::Unavailable`],
    /// to exercise the bounded-retry paths.
    pub async fn fail_next(&self, n: u32) {
        self.fail_after(0, n).await;
    }

    /// Lets `skip` operations through, then fails the following `n` with
    /// [`StoreError::Unavailable`].
    pub async fn fail_after(&self, skip: u32, n: u32) {
        let mut inner = self.inner.write().await;
        inner.skip_budget = skip;
        inner.fail_budget = n;
    }

    /// Number of live (non-expired) keys.
    pub async fn key_count(&self) -> usize {
        let now = Utc::now();
        let inner = self.inner.read().await;
        inner.keys.values().filter(|e| !e.expired(now)).count()
    }

    /// Number of entries currently in `stream`.
    pub async fn stream_len(&self, stream: &str) -> usize {
        self.inner
            .read()
            .await
            .streams
            .get(stream)
            .map_or(0, Vec::len)
    }

    /// Remaining TTL of a key, if it has one.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let inner = self.inner.read().await;
        let entry = inner.keys.get(key)?;
        let at = entry.expires_at?;
        (at - Utc::now()).to_std().ok()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.write().await;
        inner.take_fault()?;
        Ok(inner.live_value(key, Utc::now()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.take_fault()?;
        inner.put(key, value, ttl, Utc::now());
        Ok(())
    }

    async fn mset(&self, pairs: Vec<(String, Vec<u8>)>) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.take_fault()?;
        let now = Utc::now();
        for (key, value) in pairs {
            inner.put(&key, value, None, now);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.take_fault()?;
        if inner.keys.remove(key).is_some() {
            inner.bump(key);
        }
        Ok(())
    }

    async fn watch(&self, keys: &[String]) -> Result<WatchToken> {
        let mut inner = self.inner.write().await;
        inner.take_fault()?;
        let now = Utc::now();
        let versions = keys
            .iter()
            .map(|key| {
                // Expire lazily first so the watched version reflects what a
                // subsequent get would see.
                inner.live_value(key, now);
                (key.clone(), inner.version_of(key))
            })
            .collect();
        Ok(WatchToken {
            store_id: self.id,
            versions,
        })
    }

    async fn exec(&self, token: WatchToken, writes: Vec<WriteOp>) -> Result<ExecOutcome> {
        if token.store_id != self.id {
            return Err(StoreError::ForeignToken);
        }
        let mut inner = self.inner.write().await;
        inner.take_fault()?;
        let now = Utc::now();
        for (key, watched_version) in &token.versions {
            inner.live_value(key, now);
            if inner.version_of(key) != *watched_version {
                return Ok(ExecOutcome::Conflict);
            }
        }
        let touches_stream = writes
            .iter()
            .any(|w| matches!(w, WriteOp::Append { .. }));
        inner.apply_writes(writes, now);
        drop(inner);
        if touches_stream {
            self.stream_notify.notify_waiters();
        }
        Ok(ExecOutcome::Committed)
    }

    async fn append(&self, stream: &str, value: Vec<u8>) -> Result<String> {
        let mut inner = self.inner.write().await;
        inner.take_fault()?;
        let now = Utc::now();
        let id = inner.next_entry_id(now);
        inner
            .streams
            .entry(stream.to_string())
            .or_default()
            .push((id.clone(), value));
        drop(inner);
        self.stream_notify.notify_waiters();
        Ok(id)
    }

    async fn read_blocking(&self, stream: &str, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut inner = self.inner.write().await;
                inner.take_fault()?;
                if let Some(entries) = inner.streams.get(stream)
                    && let Some((_, value)) = entries.first()
                {
                    return Ok(Some(value.clone()));
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let notified = self.stream_notify.notified();
            // Re-check after arming the waiter: an append may have landed
            // between the unlock above and this point.
            {
                let inner = self.inner.read().await;
                if let Some(entries) = inner.streams.get(stream)
                    && let Some((_, value)) = entries.first()
                {
                    return Ok(Some(value.clone()));
                }
            }
            let _ = tokio::time::timeout(remaining, notified).await;
        }
    }

    async fn delete_stream(&self, stream: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.take_fault()?;
        inner.streams.remove(stream);
        Ok(())
    }
}
