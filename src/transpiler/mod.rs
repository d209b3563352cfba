//! Pluggable converters
//!
//! A [`Transpiler`] owns one source format: it decides which locations it handles,
//! turns raw content into an executable form, and executes that form either
//! blocking or non-blocking. The [`TranspilerRegistry`] dispatches to the first
//! registered transpiler that applies.

use serde_json::Value;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use crate::loader::ExecutionScope;

pub mod js;
pub mod json;

pub use js::JsTranspiler;
pub use json::JsonTranspiler;

/// Future returned by non-blocking execution
///
/// Not `Send`: non-blocking loads run on a single thread and embedded script
/// runtimes are bound to it.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

pub trait Transpiler: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// File extensions (without the dot) this transpiler handles, used for
    /// extension inference
    fn extensions(&self) -> Vec<String>;

    /// Whether this transpiler handles `location`
    fn applies(&self, location: &Path) -> bool {
        let Some(ext) = location.extension().and_then(|ext| ext.to_str()) else {
            return false;
        };
        self.extensions()
            .iter()
            .any(|known| known.eq_ignore_ascii_case(ext))
    }

    /// Turn raw content into the executable form
    fn convert(&self, location: &Path, source: &str) -> anyhow::Result<String>;

    /// Execute the converted form to completion
    fn execute(&self, converted: &str, scope: &ExecutionScope) -> anyhow::Result<Value>;

    /// Execute the converted form, suspending on nested non-blocking loads
    fn execute_async<'a>(
        &'a self,
        converted: &'a str,
        scope: &'a ExecutionScope,
    ) -> BoxFuture<'a, anyhow::Result<Value>>;
}

/// Ordered transpiler list; the first one that applies wins
#[derive(Clone, Default)]
pub struct TranspilerRegistry {
    transpilers: Vec<Arc<dyn Transpiler>>,
}

impl TranspilerRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// JavaScript and JSON, in that order
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(JsTranspiler::new()));
        registry.register(Arc::new(JsonTranspiler));
        registry
    }

    /// Append a transpiler; earlier registrations keep priority
    pub fn register(&mut self, transpiler: Arc<dyn Transpiler>) {
        self.transpilers.push(transpiler);
    }

    /// Insert a transpiler ahead of all others so it shadows earlier registrations
    pub fn register_override(&mut self, transpiler: Arc<dyn Transpiler>) {
        self.transpilers.insert(0, transpiler);
    }

    pub fn find(&self, location: &Path) -> Option<Arc<dyn Transpiler>> {
        self.transpilers
            .iter()
            .find(|transpiler| transpiler.applies(location))
            .cloned()
    }

    /// Every known extension, in dispatch order, without duplicates
    pub fn extensions(&self) -> Vec<String> {
        let mut extensions: Vec<String> = Vec::new();
        for ext in self.transpilers.iter().flat_map(|t| t.extensions()) {
            if !extensions.contains(&ext) {
                extensions.push(ext);
            }
        }
        extensions
    }

    pub fn len(&self) -> usize {
        self.transpilers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transpilers.is_empty()
    }
}
