//! Health persistence adapters.
//!
//! # Responsibilities
//! - Persist per-endpoint health across restarts
//! - Classify condition from recorded probe outcomes
//! - Surface write failures instead of swallowing them
//!
//! # Design Decisions
//! - The pool holds `Option<Arc<dyn HealthRepository>>`; `None` means pure
//!   in-memory operation and is never an error
//! - Records are keyed by the endpoint URL string
//! - The file adapter rewrites the whole document after every write

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use url::Url;

use crate::health::state::{HealthCondition, ServerHealthSnapshot};

/// Errors raised while persisting health.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("health store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("health store serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("health store unavailable: {0}")]
    Unavailable(String),
}

/// Storage for per-endpoint health snapshots.
pub trait HealthRepository: Send + Sync {
    /// Last known snapshot for the endpoint, if any.
    fn history<'a>(&'a self, endpoint: &'a Url) -> BoxFuture<'a, Option<ServerHealthSnapshot>>;

    /// Record the outcome of a probe.
    fn record_probe<'a>(
        &'a self,
        endpoint: &'a Url,
        latency: Option<Duration>,
        healthy: bool,
    ) -> BoxFuture<'a, Result<(), RepositoryError>>;

    /// Exclude the endpoint from selection until `until`.
    fn quarantine<'a>(
        &'a self,
        endpoint: &'a Url,
        until: SystemTime,
    ) -> BoxFuture<'a, Result<(), RepositoryError>>;
}

fn apply_probe(
    snapshot: &mut ServerHealthSnapshot,
    latency: Option<Duration>,
    healthy: bool,
    now: SystemTime,
    slow_threshold: Option<Duration>,
) {
    if healthy {
        snapshot.failures = 0;
        snapshot.quarantine_until = None;
        snapshot.last_ok = Some(now);
        if latency.is_some() {
            snapshot.latency = latency;
        }
    } else {
        snapshot.failures = snapshot.failures.saturating_add(1);
    }
    snapshot.condition = HealthCondition::classify(
        snapshot.failures,
        snapshot.is_quarantined_at(now),
        snapshot.latency,
        slow_threshold,
    );
}

fn apply_quarantine(snapshot: &mut ServerHealthSnapshot, until: SystemTime) {
    snapshot.quarantine_until = Some(until);
    snapshot.condition = HealthCondition::Unhealthy;
}

/// Process-local repository backed by a concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryHealthRepository {
    records: DashMap<String, ServerHealthSnapshot>,
    slow_threshold: Option<Duration>,
}

impl InMemoryHealthRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify successful probes slower than `threshold` as degraded.
    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = Some(threshold);
        self
    }

    /// Seed or overwrite a record.
    pub fn insert(&self, endpoint: &Url, snapshot: ServerHealthSnapshot) {
        self.records.insert(endpoint.to_string(), snapshot);
    }

    /// Copy of a record, without going through the async interface.
    pub fn get(&self, endpoint: &Url) -> Option<ServerHealthSnapshot> {
        self.records.get(endpoint.as_str()).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn probe(&self, endpoint: &Url, latency: Option<Duration>, healthy: bool) {
        let mut entry = self.records.entry(endpoint.to_string()).or_default();
        apply_probe(entry.value_mut(), latency, healthy, SystemTime::now(), self.slow_threshold);
    }

    fn set_quarantine(&self, endpoint: &Url, until: SystemTime) {
        let mut entry = self.records.entry(endpoint.to_string()).or_default();
        apply_quarantine(entry.value_mut(), until);
    }

    fn to_map(&self) -> HashMap<String, ServerHealthSnapshot> {
        self.records
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }
}

impl HealthRepository for InMemoryHealthRepository {
    fn history<'a>(&'a self, endpoint: &'a Url) -> BoxFuture<'a, Option<ServerHealthSnapshot>> {
        Box::pin(async move { self.get(endpoint) })
    }

    fn record_probe<'a>(
        &'a self,
        endpoint: &'a Url,
        latency: Option<Duration>,
        healthy: bool,
    ) -> BoxFuture<'a, Result<(), RepositoryError>> {
        Box::pin(async move {
            self.probe(endpoint, latency, healthy);
            Ok(())
        })
    }

    fn quarantine<'a>(
        &'a self,
        endpoint: &'a Url,
        until: SystemTime,
    ) -> BoxFuture<'a, Result<(), RepositoryError>> {
        Box::pin(async move {
            self.set_quarantine(endpoint, until);
            Ok(())
        })
    }
}

/// Repository persisted as a JSON document on disk.
#[derive(Debug)]
pub struct JsonFileHealthRepository {
    path: PathBuf,
    cache: InMemoryHealthRepository,
}

impl JsonFileHealthRepository {
    /// Open the store, loading existing records if the file exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let path = path.as_ref().to_path_buf();
        let cache = InMemoryHealthRepository::new();

        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let map: HashMap<String, ServerHealthSnapshot> = serde_json::from_slice(&bytes)?;
                for (endpoint, snapshot) in map {
                    cache.records.insert(endpoint, snapshot);
                }
                tracing::info!(path = ?path, servers = cache.len(), "Loaded server health");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = ?path, "No server health file yet");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Self { path, cache })
    }

    /// Classify successful probes slower than `threshold` as degraded.
    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.cache.slow_threshold = Some(threshold);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self) -> Result<(), RepositoryError> {
        let bytes = serde_json::to_vec_pretty(&self.cache.to_map())?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

impl HealthRepository for JsonFileHealthRepository {
    fn history<'a>(&'a self, endpoint: &'a Url) -> BoxFuture<'a, Option<ServerHealthSnapshot>> {
        self.cache.history(endpoint)
    }

    fn record_probe<'a>(
        &'a self,
        endpoint: &'a Url,
        latency: Option<Duration>,
        healthy: bool,
    ) -> BoxFuture<'a, Result<(), RepositoryError>> {
        Box::pin(async move {
            self.cache.probe(endpoint, latency, healthy);
            self.flush().await
        })
    }

    fn quarantine<'a>(
        &'a self,
        endpoint: &'a Url,
        until: SystemTime,
    ) -> BoxFuture<'a, Result<(), RepositoryError>> {
        Box::pin(async move {
            self.cache.set_quarantine(endpoint, until);
            self.flush().await
        })
    }
}
