/// `modload eval` command implementation
///
/// Loads virtual content (from `--code` or stdin) addressed as the given location.
use anyhow::{Context, Result};
use std::io::Read;

use super::{prepare, print_stats, print_value};
use crate::cli::EvalArgs;

pub async fn run(args: &EvalArgs) -> Result<()> {
    let content = match &args.code {
        Some(code) => code.clone(),
        None => {
            let mut content = String::new();
            std::io::stdin()
                .read_to_string(&mut content)
                .context("Failed to read content from stdin")?;
            content
        }
    };

    let (loader, options) = prepare(&args.load)?;

    let mut value = serde_json::Value::Null;
    for _ in 0..args.load.repeat.max(1) {
        value = if args.load.non_blocking {
            loader
                .load_by_content_async(&content, &args.location, &options)
                .await?
        } else {
            loader.load_by_content(&content, &args.location, &options)?
        };
    }

    print_value(&value, args.load.compact)?;
    if args.load.stats {
        print_stats(&loader);
    }
    Ok(())
}
