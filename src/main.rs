//! HeapSync CLI - Heap Connect dump replication
//!
//! Singer messages go to stdout; logs go to stderr.

use clap::Parser;
use heapsync::catalog::Catalog;
use heapsync::config::{CliArgs, TapConfig};
use heapsync::error::Result;
use heapsync::output::SingerWriter;
use heapsync::sync::StateDocument;
use heapsync::tap::{StreamSelection, Tap};
use std::io::{BufWriter, Write};
use tracing_subscriber::EnvFilter;

fn main() {
    // Parse CLI arguments
    let args = CliArgs::parse();

    init_logging(&args);

    // Handle result
    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(args: &CliArgs) {
    let default_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if args.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(args: CliArgs) -> Result<()> {
    // Build configuration
    let mut config = TapConfig::load(&args.config)?;
    config.apply_cli(&args);

    let tap = Tap::new(config)?;

    if args.discover {
        let catalog = tap.discover()?;
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        serde_json::to_writer_pretty(&mut out, &catalog)?;
        writeln!(out)?;
        return Ok(());
    }

    let state = match &args.state {
        Some(path) => StateDocument::load(path)?,
        None => StateDocument::default(),
    };
    let selection = StreamSelection {
        catalog: args.catalog.as_deref().map(Catalog::load).transpose()?,
        tables: args.tables.clone(),
    };

    let stdout = std::io::stdout();
    let mut writer = SingerWriter::new(BufWriter::new(stdout.lock()), state.clone());
    if let Some(path) = &args.state_output {
        writer = writer.with_state_file(path);
    }

    let summaries = tap.sync(&selection, &state, &mut writer)?;
    writer.write_state()?;
    writer.into_inner()?;

    let records: u64 = summaries.iter().map(|s| s.records_emitted).sum();
    tracing::info!(streams = summaries.len(), records, "Sync complete");
    Ok(())
}
