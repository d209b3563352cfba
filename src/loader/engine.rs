// Runs a converted unit through its transpiler in either mode

use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::debug;

use super::scope::{ExecutionScope, UnitLoader};
use super::{LoadOptions, Loader};
use crate::error::LoadError;
use crate::logging::{operations, status};
use crate::transpiler::Transpiler;

/// Outcome of one execution: the exported value and the dependency edges it recorded
pub(crate) type Executed = (Value, BTreeSet<PathBuf>);

fn scope_for(loader: &Loader, location: &Path, options: &LoadOptions, chain: &[PathBuf]) -> ExecutionScope {
    let mut chain = chain.to_vec();
    chain.push(location.to_path_buf());
    let unit_loader = UnitLoader::new(
        loader.clone(),
        location.to_path_buf(),
        options.clone(),
        chain,
    );
    ExecutionScope::new(location.to_path_buf(), unit_loader)
}

fn finish(
    scope: &ExecutionScope,
    transpiler: &dyn Transpiler,
    outcome: anyhow::Result<Value>,
    started: Instant,
) -> Result<Executed, LoadError> {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    let location = scope.location();

    match outcome {
        Ok(value) => {
            debug!(
                operation = operations::EXECUTE,
                status = status::SUCCESS,
                location = %location.display(),
                transpiler = transpiler.name(),
                elapsed_ms,
                "executed unit"
            );
            Ok((value, scope.loader().take_dependencies()))
        }
        Err(err) => {
            let message = format!("{:#}", err);
            debug!(
                operation = operations::EXECUTE,
                status = status::ERROR,
                location = %location.display(),
                transpiler = transpiler.name(),
                elapsed_ms,
                error = %message,
                "execution failed"
            );
            // A nested failure the unit caught and replaced with its own error
            // must not mask that error
            let nested = scope
                .loader()
                .take_failure()
                .filter(|failure| message.contains(&failure.to_string()));
            Err(nested.unwrap_or_else(|| LoadError::execution(location, err)))
        }
    }
}

pub(crate) fn execute(
    loader: &Loader,
    transpiler: &dyn Transpiler,
    location: &Path,
    converted: &str,
    options: &LoadOptions,
    chain: &[PathBuf],
) -> Result<Executed, LoadError> {
    let scope = scope_for(loader, location, options, chain);
    let started = Instant::now();
    let outcome = transpiler.execute(converted, &scope);
    finish(&scope, transpiler, outcome, started)
}

pub(crate) async fn execute_async(
    loader: &Loader,
    transpiler: &dyn Transpiler,
    location: &Path,
    converted: &str,
    options: &LoadOptions,
    chain: &[PathBuf],
) -> Result<Executed, LoadError> {
    let scope = scope_for(loader, location, options, chain);
    let started = Instant::now();
    let outcome = transpiler.execute_async(converted, &scope).await;
    finish(&scope, transpiler, outcome, started)
}
