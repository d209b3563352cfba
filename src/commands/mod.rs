pub mod eval;
pub mod run;

use anyhow::{Context, Result};
use serde_json::Value;
use std::io::Write;

use crate::cli::LoadArgs;
use crate::config_discovery::load_config_with_discovery;
use crate::loader::{LoadOptions, Loader};

/// Build the loader and the default load options from configuration plus flags
pub(crate) fn prepare(args: &LoadArgs) -> Result<(Loader, LoadOptions)> {
    let (config, config_path) = load_config_with_discovery(args.config.as_deref())?;
    if let Some(path) = &config_path {
        tracing::info!(config = %path.display(), "using configuration");
    }

    let loader = Loader::from_config(&config)?;
    let mut options = config.load_options()?;

    if let Some(level) = args.cache_level {
        options.cache_level = level;
    }
    if let Some(max_age) = args.max_age {
        options = options.with_max_age_ms(max_age);
    }
    for binding in &args.bindings {
        let (name, value) = parse_binding(binding)?;
        options.context.insert(name, value);
    }

    Ok((loader, options))
}

/// Parse `name=<json>`; a value that is not valid JSON is taken as a string
pub(crate) fn parse_binding(binding: &str) -> Result<(String, Value)> {
    let (name, raw) = binding
        .split_once('=')
        .with_context(|| format!("binding must look like name=value: '{}'", binding))?;
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("binding name must not be empty: '{}'", binding);
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((name.to_string(), value))
}

pub(crate) fn print_value(value: &Value, compact: bool) -> Result<()> {
    let rendered = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", rendered).context("Failed to write result")?;
    Ok(())
}

pub(crate) fn print_stats(loader: &Loader) {
    let stats = loader.cache_stats();
    eprintln!(
        "[modload] cache: {} entries, {} / {} weighted units, {}",
        stats.entries,
        stats.total_size,
        stats.max_size,
        if stats.enabled { "enabled" } else { "disabled" }
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_binding() {
        assert_eq!(parse_binding("n=3").unwrap(), ("n".to_string(), json!(3)));
        assert_eq!(
            parse_binding("obj={\"a\":[1]}").unwrap(),
            ("obj".to_string(), json!({"a": [1]}))
        );
        assert_eq!(
            parse_binding("greeting=hello world").unwrap(),
            ("greeting".to_string(), json!("hello world"))
        );
        assert_eq!(parse_binding("empty=").unwrap(), ("empty".to_string(), json!("")));
        assert!(parse_binding("novalue").is_err());
        assert!(parse_binding("=1").is_err());
    }
}
