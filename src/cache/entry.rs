/// Cache entry for one loaded unit
///
/// Tracks how far the unit got through the pipeline (raw source, converted form,
/// executed result), the dependency edges recorded by its last execution, and the
/// parameters used to decide whether it is still fresh.
use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Fallback TTL for entries whose backing file cannot be stat'ed
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30 * 60);

/// Weight charged for an executed result that cannot be serialized for measuring
const RESULT_SIZE_HINT: u64 = 16_000;

/// Pipeline stage, ordered by how much work has been done
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    RawSource,
    ConvertedForm,
    ExecutedResult,
}

/// Stage-specific content
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    RawSource(String),
    ConvertedForm(String),
    ExecutedResult(Value),
}

impl Payload {
    pub fn stage(&self) -> Stage {
        match self {
            Payload::RawSource(_) => Stage::RawSource,
            Payload::ConvertedForm(_) => Stage::ConvertedForm,
            Payload::ExecutedResult(_) => Stage::ExecutedResult,
        }
    }

    fn weight(&self) -> u64 {
        match self {
            Payload::RawSource(text) | Payload::ConvertedForm(text) => text.len() as u64,
            Payload::ExecutedResult(value) => serde_json::to_vec(value)
                .map(|bytes| bytes.len() as u64)
                .unwrap_or(RESULT_SIZE_HINT),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    location: PathBuf,
    payload: Payload,
    dependencies: BTreeSet<PathBuf>,
    observed_modified: Option<SystemTime>,
    created_at: DateTime<Utc>,
    max_age: Option<Duration>,
    source_digest: String,
}

impl CacheEntry {
    /// Start a load cycle at the raw source stage
    ///
    /// `observed_modified` is `None` for virtual content.
    pub fn new(
        location: PathBuf,
        source: String,
        observed_modified: Option<SystemTime>,
        max_age: Option<Duration>,
    ) -> Self {
        let source_digest = digest(&source);
        Self {
            location,
            payload: Payload::RawSource(source),
            dependencies: BTreeSet::new(),
            observed_modified,
            created_at: Utc::now(),
            max_age,
            source_digest,
        }
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn stage(&self) -> Stage {
        self.payload.stage()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn dependencies(&self) -> &BTreeSet<PathBuf> {
        &self.dependencies
    }

    pub fn observed_modified(&self) -> Option<SystemTime> {
        self.observed_modified
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    /// SHA-256 (hex) of the raw source this entry was built from
    pub fn source_digest(&self) -> &str {
        &self.source_digest
    }

    pub fn is_virtual(&self) -> bool {
        self.observed_modified.is_none()
    }

    pub fn converted(&self) -> Option<&str> {
        match &self.payload {
            Payload::ConvertedForm(code) => Some(code),
            _ => None,
        }
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.payload {
            Payload::ExecutedResult(value) => Some(value),
            _ => None,
        }
    }

    /// Record the converted form
    pub fn advance_to_converted(&mut self, converted: String) {
        debug_assert!(self.stage() < Stage::ConvertedForm);
        self.payload = Payload::ConvertedForm(converted);
    }

    /// Record the execution result; the dependency set is replaced, never merged
    pub fn advance_to_executed(&mut self, value: Value, dependencies: BTreeSet<PathBuf>) {
        debug_assert!(self.stage() < Stage::ExecutedResult);
        self.payload = Payload::ExecutedResult(value);
        self.dependencies = dependencies;
    }

    /// Attach the dependency edges of an execution without storing its result
    pub fn set_dependencies(&mut self, dependencies: BTreeSet<PathBuf>) {
        self.dependencies = dependencies;
    }

    pub fn size_estimate(&self) -> u64 {
        let fixed = 1 /* converted */ + 1 /* executed */ + 8 /* mtime */;
        let dependencies: u64 = self
            .dependencies
            .iter()
            .map(|dep| dep.as_os_str().len() as u64)
            .sum();
        fixed + self.location.as_os_str().len() as u64 + self.payload.weight() + dependencies
    }

    fn age(&self) -> Duration {
        (Utc::now() - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Staleness decision given the backing file's current modification time
    ///
    /// An explicit `max_age` wins over modification times. Without one, any change
    /// in modification time is stale; when the file cannot be stat'ed (or the
    /// content was virtual) the default TTL applies.
    pub(crate) fn is_stale_with(&self, current_modified: Option<SystemTime>) -> bool {
        if let Some(max_age) = self.max_age {
            return self.age() >= max_age;
        }

        match (self.observed_modified, current_modified) {
            (Some(observed), Some(current)) => observed != current,
            _ => self.age() >= DEFAULT_MAX_AGE,
        }
    }

    /// Self-staleness, blocking stat
    pub fn is_stale(&self) -> bool {
        if self.max_age.is_some() || self.is_virtual() {
            return self.is_stale_with(None);
        }
        let current = std::fs::metadata(&self.location)
            .and_then(|meta| meta.modified())
            .ok();
        self.is_stale_with(current)
    }

    /// Self-staleness, non-blocking stat
    pub async fn is_stale_async(&self) -> bool {
        if self.max_age.is_some() || self.is_virtual() {
            return self.is_stale_with(None);
        }
        let current = tokio::fs::metadata(&self.location)
            .await
            .and_then(|meta| meta.modified())
            .ok();
        self.is_stale_with(current)
    }
}

pub(crate) fn digest(source: &str) -> String {
    hex::encode(Sha256::digest(source.as_bytes()))
}
