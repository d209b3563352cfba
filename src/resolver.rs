/// Path resolution for loadable units
///
/// Turns a requested identifier into the canonical location used as the cache key:
/// absolute, lexically normalized, extension-completed and symlink-resolved when
/// the file exists. Registered path processors run last.
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// Rewrites a resolved path before it is used as a cache key
pub type PathProcessor = Arc<dyn Fn(PathBuf) -> PathBuf + Send + Sync>;

/// A nested load request, classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Host-provided module, addressed by bare name (never tracked or cached)
    External(String),
    /// File-backed unit, already resolved to its canonical location
    Local(PathBuf),
}

#[derive(Default)]
pub struct PathResolver {
    processors: RwLock<Vec<PathProcessor>>,
}

impl PathResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a path processor; processors run in registration order
    pub fn add_processor(&self, processor: PathProcessor) {
        self.processors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(processor);
    }

    /// Requests that are neither absolute nor explicitly relative name external modules
    pub fn is_external(request: &str) -> bool {
        !request.starts_with('.') && !Path::new(request).is_absolute()
    }

    /// Classify and resolve a request issued by the unit at `parent`
    pub fn resolve_request(&self, request: &str, parent: &Path, extensions: &[String]) -> Request {
        if Self::is_external(request) {
            return Request::External(request.to_string());
        }

        let base = parent.parent().unwrap_or_else(|| Path::new("/"));
        Request::Local(self.resolve(Path::new(request), base, extensions))
    }

    /// Resolve `request` against `base` into a canonical location
    ///
    /// Never fails: a location that cannot be completed is returned as-is so the
    /// caller can report what exactly was missing.
    pub fn resolve(&self, request: &Path, base: &Path, extensions: &[String]) -> PathBuf {
        let joined = if request.is_absolute() {
            request.to_path_buf()
        } else {
            base.join(request)
        };

        let mut path = normalize(&joined);
        if path.extension().is_none() {
            if let Some(found) = infer_extension(&path, extensions) {
                path = found;
            }
        }

        let path = fs::canonicalize(&path).unwrap_or(path);
        self.process(path)
    }

    fn process(&self, path: PathBuf) -> PathBuf {
        let processors = self
            .processors
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        processors
            .iter()
            .fold(path, |path, processor| processor(path))
    }
}

/// Lexically remove `.` and `..` components
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Try `<path>.<ext>` then `<path>/index.<ext>` for every known extension
fn infer_extension(path: &Path, extensions: &[String]) -> Option<PathBuf> {
    for ext in extensions {
        let mut candidate = path.as_os_str().to_os_string();
        candidate.push(".");
        candidate.push(ext);
        let candidate = PathBuf::from(candidate);
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    extensions
        .iter()
        .map(|ext| path.join(format!("index.{}", ext)))
        .find(|candidate| candidate.is_file())
}
