//! What an executing unit sees of its host
//!
//! A transpiler receives an [`ExecutionScope`]: the unit's location, the injected
//! bindings, and a [`UnitLoader`] capability through which every nested load
//! request goes. The unit loader records dependency edges for the unit and keeps
//! the first nested failure so that it reaches the root caller unchanged even when
//! the script runtime only saw a message.

use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use super::{LoadOptions, Loader};
use crate::error::LoadError;
use crate::resolver::Request;

pub struct ExecutionScope {
    location: PathBuf,
    loader: UnitLoader,
}

impl ExecutionScope {
    pub(crate) fn new(location: PathBuf, loader: UnitLoader) -> Self {
        Self { location, loader }
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Directory containing the unit
    pub fn dirname(&self) -> &Path {
        self.location.parent().unwrap_or_else(|| Path::new("/"))
    }

    /// Injected bindings; mutations made by the unit are never propagated back
    pub fn bindings(&self) -> &Map<String, Value> {
        &self.loader.options.context
    }

    pub fn loader(&self) -> &UnitLoader {
        &self.loader
    }
}

/// Nested-load capability handed to one executing unit
#[derive(Clone)]
pub struct UnitLoader {
    loader: Loader,
    parent: PathBuf,
    options: Arc<LoadOptions>,
    /// Units currently loading on this call chain, outermost first, ending with `parent`
    chain: Arc<[PathBuf]>,
    dependencies: Arc<Mutex<BTreeSet<PathBuf>>>,
    failure: Arc<Mutex<Option<LoadError>>>,
}

impl UnitLoader {
    pub(crate) fn new(loader: Loader, parent: PathBuf, options: LoadOptions, chain: Vec<PathBuf>) -> Self {
        Self {
            loader,
            parent,
            options: Arc::new(options),
            chain: chain.into(),
            dependencies: Arc::default(),
            failure: Arc::default(),
        }
    }

    /// Canonical location a request resolves to, or the external name
    pub fn resolve(&self, request: &str) -> Result<String, LoadError> {
        match self.loader.resolve_request(request, &self.parent) {
            Request::External(name) if self.loader.has_external(&name) => Ok(name),
            Request::External(name) => Err(self.fail(self.unknown_external(&name))),
            Request::Local(location) => Ok(location.to_string_lossy().into_owned()),
        }
    }

    /// Blocking nested load
    pub fn require(&self, request: &str) -> Result<Value, LoadError> {
        match self.loader.resolve_request(request, &self.parent) {
            Request::External(name) => self.external(&name),
            Request::Local(location) => {
                self.record(&location);
                self.loader
                    .load_nested(location, &self.options, &self.chain)
                    .map_err(|err| self.fail(err))
            }
        }
    }

    /// Non-blocking nested load; suspends the caller until the dependency settles
    pub async fn require_async(&self, request: &str) -> Result<Value, LoadError> {
        match self.loader.resolve_request(request, &self.parent) {
            Request::External(name) => self.external(&name),
            Request::Local(location) => {
                self.record(&location);
                self.loader
                    .load_nested_async(location, Arc::clone(&self.options), Arc::clone(&self.chain))
                    .await
                    .map_err(|err| self.fail(err))
            }
        }
    }

    /// Dependency edges recorded so far, leaving the set empty
    pub fn take_dependencies(&self) -> BTreeSet<PathBuf> {
        std::mem::take(&mut *self.dependencies.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// First nested failure, if any
    pub fn take_failure(&self) -> Option<LoadError> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn external(&self, name: &str) -> Result<Value, LoadError> {
        self.loader
            .external(name)
            .ok_or_else(|| self.fail(self.unknown_external(name)))
    }

    fn unknown_external(&self, name: &str) -> LoadError {
        LoadError::resolution(
            Path::new(name),
            format!("no external module registered (required by '{}')", self.parent.display()),
        )
    }

    fn record(&self, location: &Path) {
        self.dependencies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(location.to_path_buf());
    }

    fn fail(&self, err: LoadError) -> LoadError {
        let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        if failure.is_none() {
            *failure = Some(err.clone());
        }
        err
    }
}
