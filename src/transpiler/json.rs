use anyhow::Context as _;
use serde_json::Value;
use std::path::Path;

use super::{BoxFuture, Transpiler};
use crate::loader::ExecutionScope;

/// Static data units; the converted form is the document itself
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonTranspiler;

impl Transpiler for JsonTranspiler {
    fn name(&self) -> &str {
        "json"
    }

    fn extensions(&self) -> Vec<String> {
        vec!["json".to_string()]
    }

    fn convert(&self, _location: &Path, source: &str) -> anyhow::Result<String> {
        Ok(source.trim_start_matches('\u{feff}').to_string())
    }

    fn execute(&self, converted: &str, scope: &ExecutionScope) -> anyhow::Result<Value> {
        serde_json::from_str(converted)
            .with_context(|| format!("invalid JSON in {}", scope.location().display()))
    }

    fn execute_async<'a>(
        &'a self,
        converted: &'a str,
        scope: &'a ExecutionScope,
    ) -> BoxFuture<'a, anyhow::Result<Value>> {
        Box::pin(async move { self.execute(converted, scope) })
    }
}
