/// `modload run` command implementation
///
/// Loads a unit from disk, `--repeat` times, and prints the last exported value.
use anyhow::Result;
use std::time::Instant;

use super::{prepare, print_stats, print_value};
use crate::cli::RunArgs;

pub async fn run(args: &RunArgs) -> Result<()> {
    let (loader, options) = prepare(&args.load)?;

    let mut value = serde_json::Value::Null;
    for attempt in 1..=args.load.repeat.max(1) {
        let started = Instant::now();
        value = if args.load.non_blocking {
            loader.load_by_location_async(&args.location, &options).await?
        } else {
            loader.load_by_location(&args.location, &options)?
        };
        tracing::debug!(
            attempt,
            elapsed_ms = started.elapsed().as_millis() as u64,
            location = %args.location.display(),
            "load finished"
        );
    }

    print_value(&value, args.load.compact)?;
    if args.load.stats {
        print_stats(&loader);
    }
    Ok(())
}
