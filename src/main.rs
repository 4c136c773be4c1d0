use anyhow::{Context, Result};
use clap::Parser;

use geoloc::cli::Cli;
use geoloc::{bootstrap, init_tracing, AppConfig, BatchGeocoder, InputReader, ProviderRegistry};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = AppConfig::from_env();
    tracing::debug!(config = ?config.public_profile(), "configuration loaded");

    let registry = ProviderRegistry::from_config(&config).context("failed to build HTTP client")?;
    if !cli.dev {
        registry.resolve(&cli.provider)?;
    }
    let store = bootstrap(&cli.dbname, &cli.tbl)
        .with_context(|| format!("failed to open store {}", cli.dbname.display()))?;

    if cli.dev {
        let count = store.count().context("failed to count stored locations")?;
        println!("{}: {count} locations in `{}`", store.path().display(), store.table());
        return Ok(());
    }

    let geocoder = BatchGeocoder::new(&store, &registry, &cli.provider, cli.wait())?;
    let rows = InputReader::from_path(&cli.infile, &cli.input_format())
        .with_context(|| format!("failed to read {}", cli.infile.display()))?;
    let summary = geocoder.run(rows).context("batch aborted")?;

    println!(
        "{} rows: {} stored, {} duplicates, {} without results, {} failed, {} provider calls{}",
        summary.processed,
        summary.persisted,
        summary.duplicates,
        summary.no_result,
        summary.failed,
        summary.provider_calls,
        if summary.halted {
            " (halted on rate limit)"
        } else {
            ""
        }
    );
    Ok(())
}
