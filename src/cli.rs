use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::loader::CacheLevel;

/// modload - on-demand module loader with dependency-aware caching
///
/// Loads script and data units, converts and executes them, and memoizes the
/// exported values until a unit or one of its dependencies changes.
#[derive(Parser, Debug)]
#[command(name = "modload")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "On-demand module loader with dependency-aware caching", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load a unit from disk and print its exported value
    Run(RunArgs),

    /// Load virtual content under a given location and print its exported value
    Eval(EvalArgs),
}

/// Options shared by every load command
#[derive(Args, Debug, Clone)]
pub struct LoadArgs {
    /// Config file path (skips discovery of modload.toml)
    #[arg(short = 'c', long, env = "MODLOAD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Use the non-blocking pipeline
    #[arg(long = "async")]
    pub non_blocking: bool,

    /// How much of each load is cached
    #[arg(long, value_enum)]
    pub cache_level: Option<CacheLevel>,

    /// Explicit TTL in milliseconds (negative compares modification times)
    #[arg(long, allow_negative_numbers = true)]
    pub max_age: Option<i64>,

    /// Inject a binding, `name=<json>` (values that are not JSON are taken as strings)
    #[arg(long = "set", value_name = "NAME=VALUE")]
    pub bindings: Vec<String>,

    /// Load this many times (later loads are served from the cache when fresh)
    #[arg(long, default_value_t = 1)]
    pub repeat: u32,

    /// Print cache statistics to stderr when done
    #[arg(long)]
    pub stats: bool,

    /// Print compact JSON instead of pretty JSON
    #[arg(long)]
    pub compact: bool,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Unit to load (extension inferred when omitted)
    pub location: PathBuf,

    #[command(flatten)]
    pub load: LoadArgs,
}

#[derive(Parser, Debug)]
pub struct EvalArgs {
    /// Location the content is addressed as (selects the transpiler and resolves
    /// relative requests)
    pub location: PathBuf,

    /// Source text; read from stdin when omitted
    #[arg(long)]
    pub code: Option<String>,

    #[command(flatten)]
    pub load: LoadArgs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from([
            "modload",
            "run",
            "config.js",
            "--async",
            "--cache-level",
            "converted-only",
            "--max-age",
            "-1",
            "--set",
            "a=1",
            "--set",
            "b=hi",
            "--repeat",
            "3",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.location, PathBuf::from("config.js"));
        assert!(args.load.non_blocking);
        assert_eq!(args.load.cache_level, Some(CacheLevel::ConvertedOnly));
        assert_eq!(args.load.max_age, Some(-1));
        assert_eq!(args.load.bindings, vec!["a=1", "b=hi"]);
        assert_eq!(args.load.repeat, 3);
    }

    #[test]
    fn test_parse_eval() {
        let cli = Cli::parse_from(["modload", "eval", "x.js", "--code", "module.exports = 1"]);
        let Commands::Eval(args) = cli.command else {
            panic!("expected eval");
        };
        assert_eq!(args.code.as_deref(), Some("module.exports = 1"));
        assert!(!args.load.non_blocking);
        assert_eq!(args.load.repeat, 1);
    }
}
