//! Load orchestration
//!
//! [`Loader`] owns the resolver, the transpiler registry, the cache store and the
//! table of in-flight loads, and exposes the four entry points:
//!
//! - [`Loader::load_by_location`] / [`Loader::load_by_location_async`]: resolve a
//!   location, serve a fresh executed result from the cache or read the file and
//!   continue as a content load
//! - [`Loader::load_by_content`] / [`Loader::load_by_content_async`]: convert
//!   (reusing a fresh converted form when the cache level allows), execute and
//!   store at the configured granularity
//!
//! Nested loads issued by an executing unit come back in through
//! [`UnitLoader`], carrying the chain of units currently loading so that a unit
//! that transitively requires itself fails with [`LoadError::CircularLoad`].

use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::SystemTime;
use tracing::{debug, info};

mod engine;
pub mod inflight;
pub mod options;
pub mod scope;

pub use inflight::FlightTable;
pub use options::{CacheLevel, LoadOptions};
pub use scope::{ExecutionScope, UnitLoader};

use crate::cache::{CacheEntry, CacheOptions, CacheStats, CacheStore, Payload, Stage};
use crate::config::Config;
use crate::error::LoadError;
use crate::logging::{operations, status};
use crate::resolver::{PathProcessor, PathResolver, Request};
use crate::transpiler::{BoxFuture, Transpiler, TranspilerRegistry};
use inflight::Claim;

struct Inner {
    resolver: PathResolver,
    transpilers: RwLock<TranspilerRegistry>,
    cache: CacheStore,
    externals: RwLock<HashMap<String, Value>>,
    flights: Arc<FlightTable>,
}

/// Module loader; cheap to clone, clones share all state
#[derive(Clone)]
pub struct Loader {
    inner: Arc<Inner>,
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

impl Loader {
    /// Loader with the default transpilers and store capacity
    pub fn new() -> Self {
        Self::with_parts(TranspilerRegistry::with_defaults(), CacheOptions::default())
    }

    pub fn with_parts(transpilers: TranspilerRegistry, cache_options: CacheOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                resolver: PathResolver::new(),
                transpilers: RwLock::new(transpilers),
                cache: CacheStore::new(cache_options),
                externals: RwLock::new(HashMap::new()),
                flights: Arc::new(FlightTable::new()),
            }),
        }
    }

    /// Loader configured from a `modload.toml`
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let loader = Self::with_parts(
            TranspilerRegistry::with_defaults(),
            CacheOptions::with_max_size(config.cache.max_size_bytes()?),
        );
        if !config.cache.enabled {
            loader.disable_cache(false);
        }
        for (name, value) in &config.externals {
            loader.register_external(name.clone(), value.clone());
        }
        Ok(loader)
    }

    // ---- entry points -------------------------------------------------------

    /// Blocking load of the unit at `location`
    pub fn load_by_location(
        &self,
        location: impl AsRef<Path>,
        options: &LoadOptions,
    ) -> Result<Value, LoadError> {
        let location = self.locate(location.as_ref());
        self.load_file(location, options, &[])
    }

    /// Non-blocking load of the unit at `location`
    pub async fn load_by_location_async(
        &self,
        location: impl AsRef<Path>,
        options: &LoadOptions,
    ) -> Result<Value, LoadError> {
        let location = self.locate(location.as_ref());
        self.load_file_async(location, Arc::new(options.clone()), Arc::from(Vec::<PathBuf>::new()), None)
            .await
    }

    /// Blocking load of virtual content addressed as `location`
    pub fn load_by_content(
        &self,
        content: &str,
        location: impl AsRef<Path>,
        options: &LoadOptions,
    ) -> Result<Value, LoadError> {
        let location = self.locate(location.as_ref());
        debug!(operation = operations::LOAD, location = %location.display(), "loading virtual content");
        self.run_pipeline(location, content.to_string(), None, options, &[])
    }

    /// Non-blocking load of virtual content addressed as `location`
    pub async fn load_by_content_async(
        &self,
        content: &str,
        location: impl AsRef<Path>,
        options: &LoadOptions,
    ) -> Result<Value, LoadError> {
        let location = self.locate(location.as_ref());
        debug!(operation = operations::LOAD_ASYNC, location = %location.display(), "loading virtual content");
        self.run_pipeline_async(location, content.to_string(), None, options, &[])
            .await
    }

    // ---- administration -----------------------------------------------------

    /// Canonical location `location` resolves to from the current directory
    pub fn resolve(&self, location: impl AsRef<Path>) -> PathBuf {
        self.locate(location.as_ref())
    }

    pub fn cache(&self) -> &CacheStore {
        &self.inner.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub fn enable_cache(&self) {
        self.inner.cache.enable();
        info!("cache enabled");
    }

    pub fn disable_cache(&self, clear: bool) {
        self.inner.cache.disable(clear);
        info!(clear, "cache disabled");
    }

    /// Drop every cached entry
    pub fn invalidate_cache(&self) {
        self.inner.cache.invalidate_all();
    }

    /// Drop the cached entry for `location`; returns whether one was present
    pub fn invalidate(&self, location: impl AsRef<Path>) -> bool {
        let location = self.locate(location.as_ref());
        self.inner.cache.invalidate(&location)
    }

    /// Replace capacity and size weighting, migrating fresh entries unless `clear`
    pub fn set_cache_options(&self, options: CacheOptions, clear: bool) {
        self.inner.cache.configure(options, clear);
    }

    /// Register a transpiler after the existing ones
    pub fn register_transpiler(&self, transpiler: Arc<dyn Transpiler>) {
        info!(transpiler = transpiler.name(), "registered transpiler");
        self.inner
            .transpilers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(transpiler);
    }

    /// Register a transpiler that takes priority over every existing one
    pub fn override_transpiler(&self, transpiler: Arc<dyn Transpiler>) {
        info!(transpiler = transpiler.name(), "registered overriding transpiler");
        self.inner
            .transpilers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register_override(transpiler);
    }

    pub fn register_path_processor(&self, processor: PathProcessor) {
        self.inner.resolver.add_processor(processor);
    }

    /// Serve `value` for non-relative requests of `name`
    pub fn register_external(&self, name: impl Into<String>, value: Value) {
        self.inner
            .externals
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), value);
    }

    pub(crate) fn external(&self, name: &str) -> Option<Value> {
        self.inner
            .externals
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub(crate) fn has_external(&self, name: &str) -> bool {
        self.inner
            .externals
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    // ---- resolution ---------------------------------------------------------

    fn extensions(&self) -> Vec<String> {
        self.inner
            .transpilers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .extensions()
    }

    fn transpiler_for(&self, location: &Path) -> Result<Arc<dyn Transpiler>, LoadError> {
        self.inner
            .transpilers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .find(location)
            .ok_or_else(|| LoadError::unsupported(location))
    }

    fn locate(&self, location: &Path) -> PathBuf {
        let base = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        self.inner
            .resolver
            .resolve(location, &base, &self.extensions())
    }

    pub(crate) fn resolve_request(&self, request: &str, parent: &Path) -> Request {
        self.inner
            .resolver
            .resolve_request(request, parent, &self.extensions())
    }

    // ---- nested loads -------------------------------------------------------

    pub(crate) fn load_nested(
        &self,
        location: PathBuf,
        options: &LoadOptions,
        chain: &[PathBuf],
    ) -> Result<Value, LoadError> {
        self.load_file(location, options, chain)
    }

    pub(crate) fn load_nested_async(
        &self,
        location: PathBuf,
        options: Arc<LoadOptions>,
        chain: Arc<[PathBuf]>,
    ) -> BoxFuture<'_, Result<Value, LoadError>> {
        let parent = chain.last().cloned();
        Box::pin(self.load_file_async(location, options, chain, parent))
    }

    // ---- pipeline -----------------------------------------------------------

    fn load_file(
        &self,
        location: PathBuf,
        options: &LoadOptions,
        chain: &[PathBuf],
    ) -> Result<Value, LoadError> {
        check_chain(&location, chain)?;
        let modified = loadable(&location, std::fs::metadata(&location))?;

        if options.cache_level == CacheLevel::FullResult {
            if let Some(value) = self.inner.cache.get(&location).and_then(file_backed_result) {
                return Ok(value);
            }
        }

        let source = std::fs::read_to_string(&location)
            .map_err(|err| LoadError::resolution(&location, err.to_string()))?;
        debug!(operation = operations::LOAD, location = %location.display(), "loading unit");
        self.run_pipeline(location, source, modified, options, chain)
    }

    async fn load_file_async(
        &self,
        location: PathBuf,
        options: Arc<LoadOptions>,
        chain: Arc<[PathBuf]>,
        parent: Option<PathBuf>,
    ) -> Result<Value, LoadError> {
        check_chain(&location, &chain)?;

        loop {
            let modified = loadable(&location, tokio::fs::metadata(&location).await)?;

            let guard = match self.inner.flights.claim(&location, parent.as_deref())? {
                Claim::Owner(guard) => guard,
                Claim::Waiter(waiter) => match waiter.wait().await {
                    Some(outcome) => {
                        debug!(
                            operation = operations::LOAD_ASYNC,
                            status = status::SHARED,
                            location = %location.display(),
                            "joined in-flight load"
                        );
                        return outcome;
                    }
                    // The owner went away without an outcome; claim again
                    None => continue,
                },
            };

            if options.cache_level == CacheLevel::FullResult {
                if let Some(value) = self.inner.cache.get_async(&location).await.and_then(file_backed_result) {
                    guard.complete(&Ok(value.clone()));
                    return Ok(value);
                }
            }

            let outcome = match tokio::fs::read_to_string(&location).await {
                Ok(source) => {
                    debug!(operation = operations::LOAD_ASYNC, location = %location.display(), "loading unit");
                    self.run_pipeline_async(location.clone(), source, modified, &options, &chain)
                        .await
                }
                Err(err) => Err(LoadError::resolution(&location, err.to_string())),
            };
            guard.complete(&outcome);
            return outcome;
        }
    }

    fn run_pipeline(
        &self,
        location: PathBuf,
        source: String,
        modified: Option<SystemTime>,
        options: &LoadOptions,
        chain: &[PathBuf],
    ) -> Result<Value, LoadError> {
        let transpiler = self.transpiler_for(&location)?;
        let mut entry = CacheEntry::new(location, source, modified, options.max_age);

        let reusable = self.reusable_converted(&entry, options, |cached| !cached.is_stale());
        let converted = self.converted_form(&*transpiler, &entry, reusable)?;
        entry.advance_to_converted(converted);

        let converted = entry.converted().unwrap_or_default();
        let (value, dependencies) = engine::execute(
            self,
            &*transpiler,
            entry.location(),
            converted,
            options,
            chain,
        )?;

        self.store(entry, &value, dependencies, options);
        Ok(value)
    }

    async fn run_pipeline_async(
        &self,
        location: PathBuf,
        source: String,
        modified: Option<SystemTime>,
        options: &LoadOptions,
        chain: &[PathBuf],
    ) -> Result<Value, LoadError> {
        let transpiler = self.transpiler_for(&location)?;
        let mut entry = CacheEntry::new(location, source, modified, options.max_age);

        let reusable = match self.reusable_converted(&entry, options, |_| true) {
            Some(cached) if !cached.is_stale_async().await => Some(cached),
            _ => None,
        };
        let converted = self.converted_form(&*transpiler, &entry, reusable)?;
        entry.advance_to_converted(converted);

        let converted = entry.converted().unwrap_or_default();
        let (value, dependencies) = engine::execute_async(
            self,
            &*transpiler,
            entry.location(),
            converted,
            options,
            chain,
        )
        .await?;

        self.store(entry, &value, dependencies, options);
        Ok(value)
    }

    /// Cached converted form built from the same source, if the level permits reuse
    fn reusable_converted(
        &self,
        entry: &CacheEntry,
        options: &LoadOptions,
        fresh: impl FnOnce(&CacheEntry) -> bool,
    ) -> Option<Arc<CacheEntry>> {
        if !options.stores_converted() {
            return None;
        }
        self.inner
            .cache
            .peek(entry.location())
            .filter(|cached| cached.stage() == Stage::ConvertedForm)
            .filter(|cached| cached.source_digest() == entry.source_digest())
            .filter(|cached| fresh(&**cached))
    }

    fn converted_form(
        &self,
        transpiler: &dyn Transpiler,
        entry: &CacheEntry,
        reusable: Option<Arc<CacheEntry>>,
    ) -> Result<String, LoadError> {
        if let Some(converted) = reusable.as_ref().and_then(|cached| cached.converted()) {
            debug!(
                operation = operations::CONVERT,
                status = status::HIT,
                location = %entry.location().display(),
                "reusing converted form"
            );
            return Ok(converted.to_string());
        }

        let source = match entry.payload() {
            Payload::RawSource(source) => source.as_str(),
            _ => "",
        };
        transpiler
            .convert(entry.location(), source)
            .map_err(|err| LoadError::conversion(entry.location(), err))
    }

    fn store(
        &self,
        mut entry: CacheEntry,
        value: &Value,
        dependencies: BTreeSet<PathBuf>,
        options: &LoadOptions,
    ) {
        match options.cache_level {
            CacheLevel::None => {}
            CacheLevel::ConvertedOnly => {
                entry.set_dependencies(dependencies);
                self.inner.cache.put(entry);
            }
            CacheLevel::FullResult => {
                entry.advance_to_executed(value.clone(), dependencies);
                self.inner.cache.put(entry);
            }
        }
    }
}

/// Executed result usable for a load from disk; a result produced from virtual
/// content never stands in for the file at the same location
fn file_backed_result(entry: Arc<CacheEntry>) -> Option<Value> {
    if entry.is_virtual() {
        return None;
    }
    entry.result().cloned()
}

fn check_chain(location: &Path, chain: &[PathBuf]) -> Result<(), LoadError> {
    if !chain.iter().any(|loading| loading == location) {
        return Ok(());
    }
    let path = chain
        .iter()
        .chain(std::iter::once(&location.to_path_buf()))
        .map(|unit| unit.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ");
    Err(LoadError::CircularLoad {
        location: location.to_path_buf(),
        chain: path,
    })
}

/// Verify that `location` names a loadable file, returning its modification time
fn loadable(
    location: &Path,
    metadata: std::io::Result<std::fs::Metadata>,
) -> Result<Option<SystemTime>, LoadError> {
    if location.extension().is_none() {
        return Err(LoadError::unsupported(location));
    }
    match metadata {
        Ok(meta) if meta.is_file() => Ok(meta.modified().ok()),
        Ok(_) => Err(LoadError::resolution(location, "not a file")),
        Err(err) => Err(LoadError::resolution(location, err.to_string())),
    }
}

static GLOBAL: OnceLock<Loader> = OnceLock::new();

/// Process-wide default loader, created with defaults on first use
pub fn global() -> &'static Loader {
    GLOBAL.get_or_init(Loader::new)
}

/// Install the process-wide default loader
///
/// Fails (handing the loader back) when a default is already installed.
pub fn init_global(loader: Loader) -> Result<(), Loader> {
    GLOBAL.set(loader)
}
