// Library interface for modload
// The binary and integration tests use the loader through this crate root

pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod config_discovery;
pub mod error;
pub mod loader;
pub mod logging;
pub mod resolver;
pub mod transpiler;

// Re-export commonly used types
pub use cache::{CacheEntry, CacheOptions, CacheStats, CacheStore, Stage};
pub use config::Config;
pub use error::{ErrorKind, LoadError};
pub use loader::{global, init_global, CacheLevel, ExecutionScope, LoadOptions, Loader, UnitLoader};
pub use transpiler::{BoxFuture, JsTranspiler, JsonTranspiler, Transpiler, TranspilerRegistry};
