// Common test utilities shared across integration tests
//
// ## Scripted units
//
// `StepTranspiler` handles `.step` files, a tiny line-based format that makes
// pipeline behavior observable without a script runtime:
//
//   require <request>   nested load (non-blocking in non-blocking executions)
//   sleep <ms>          suspend (non-blocking) or block the thread (blocking)
//   value <json>        the unit's export
//   fail <message>      execution error
//
// A unit without `value` exports the array of its required values. Every
// convert and execute call is counted per location so tests can assert exactly
// how much of the pipeline ran.
//
// ## Isolation
//
// Each test builds its own `Loader` and `Workspace` (a temp directory, removed
// on drop); nothing is shared between tests except the process-wide default
// loader, which is only touched by tests marked `#[serial]`.

#![allow(dead_code)]

use anyhow::{anyhow, bail, Context};
use modload::{BoxFuture, CacheOptions, ExecutionScope, Loader, Transpiler, TranspilerRegistry};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

#[derive(Default)]
pub struct StepTranspiler {
    converts: Mutex<HashMap<PathBuf, usize>>,
    executes: Mutex<HashMap<PathBuf, usize>>,
}

enum Step {
    Require(String),
    Sleep(u64),
    Value(Value),
    Fail(String),
}

fn parse(source: &str) -> anyhow::Result<Vec<Step>> {
    source
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            let (directive, arg) = line.split_once(' ').unwrap_or((line, ""));
            let arg = arg.trim();
            Ok(match directive {
                "require" => Step::Require(arg.to_string()),
                "sleep" => Step::Sleep(arg.parse().context("sleep takes milliseconds")?),
                "value" => Step::Value(serde_json::from_str(arg).context("value takes JSON")?),
                "fail" => Step::Fail(arg.to_string()),
                other => bail!("unknown directive '{}'", other),
            })
        })
        .collect()
}

impl StepTranspiler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn converts(&self, location: &Path) -> usize {
        self.converts.lock().unwrap().get(location).copied().unwrap_or(0)
    }

    pub fn executes(&self, location: &Path) -> usize {
        self.executes.lock().unwrap().get(location).copied().unwrap_or(0)
    }

    fn count_execute(&self, location: &Path) {
        *self
            .executes
            .lock()
            .unwrap()
            .entry(location.to_path_buf())
            .or_insert(0) += 1;
    }
}

fn export(value: Option<Value>, required: Vec<Value>) -> Value {
    value.unwrap_or(Value::Array(required))
}

impl Transpiler for StepTranspiler {
    fn name(&self) -> &str {
        "step"
    }

    fn extensions(&self) -> Vec<String> {
        vec!["step".to_string()]
    }

    fn convert(&self, location: &Path, source: &str) -> anyhow::Result<String> {
        *self
            .converts
            .lock()
            .unwrap()
            .entry(location.to_path_buf())
            .or_insert(0) += 1;
        parse(source)?;
        Ok(source.to_string())
    }

    fn execute(&self, converted: &str, scope: &ExecutionScope) -> anyhow::Result<Value> {
        self.count_execute(scope.location());
        let mut value = None;
        let mut required = Vec::new();
        for step in parse(converted)? {
            match step {
                Step::Require(request) => required.push(scope.loader().require(&request)?),
                Step::Sleep(ms) => std::thread::sleep(Duration::from_millis(ms)),
                Step::Value(v) => value = Some(v),
                Step::Fail(message) => return Err(anyhow!(message)),
            }
        }
        Ok(export(value, required))
    }

    fn execute_async<'a>(
        &'a self,
        converted: &'a str,
        scope: &'a ExecutionScope,
    ) -> BoxFuture<'a, anyhow::Result<Value>> {
        Box::pin(async move {
            self.count_execute(scope.location());
            let mut value = None;
            let mut required = Vec::new();
            for step in parse(converted)? {
                match step {
                    Step::Require(request) => {
                        required.push(scope.loader().require_async(&request).await?)
                    }
                    Step::Sleep(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
                    Step::Value(v) => value = Some(v),
                    Step::Fail(message) => return Err(anyhow!(message)),
                }
            }
            Ok(export(value, required))
        })
    }
}

/// Loader with the default transpilers plus the scripted one
pub fn loader_with_steps() -> (Loader, Arc<StepTranspiler>) {
    let steps = StepTranspiler::new();
    let mut registry = TranspilerRegistry::with_defaults();
    registry.register(steps.clone());
    (Loader::with_parts(registry, CacheOptions::default()), steps)
}

/// Scratch directory whose paths are already canonical
pub struct Workspace {
    _temp_dir: TempDir,
    root: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        Self {
            _temp_dir: temp_dir,
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Create a file (and its parent directories), returning its canonical path
    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    /// Replace a file's content and move its modification time forward, so the
    /// change is visible even on filesystems with coarse timestamps
    pub fn rewrite(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.path(relative);
        let before = modified(&path);
        fs::write(&path, content).unwrap();
        set_modified(&path, before + Duration::from_secs(2));
        path
    }

    /// Move a file's modification time forward without changing its content
    pub fn touch(&self, relative: &str) -> PathBuf {
        let path = self.path(relative);
        set_modified(&path, modified(&path) + Duration::from_secs(2));
        path
    }
}

pub fn modified(path: &Path) -> SystemTime {
    fs::metadata(path).unwrap().modified().unwrap()
}

pub fn set_modified(path: &Path, time: SystemTime) {
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(time)
        .unwrap();
}
