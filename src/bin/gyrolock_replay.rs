//! gyrolock-replay - run a recorded input trace through the tracker
//!
//! Prints one JSON record per trace event to stdout.

use anyhow::Result;
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;

use gyro_lock::replay::{self, Trace};
use gyro_lock::TrackerConfig;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Trace file (JSON).
    trace: PathBuf,
    /// Tracker config file (JSON, or TOML by extension).
    #[arg(long, env = "GYROLOCK_CONFIG")]
    config: Option<PathBuf>,
    /// Target label, overriding the configured one.
    #[arg(long)]
    target: Option<String>,
    /// Only print records that produced observer notifications.
    #[arg(long)]
    changes_only: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TrackerConfig::load_from(path)?,
        None => TrackerConfig::load()?,
    };
    if let Some(target) = args.target {
        config = config.with_target(target);
    }

    let trace = Trace::load(&args.trace)?;
    log::info!(
        "replaying {} ({} events, target {:?})",
        args.trace.display(),
        trace.events.len(),
        config.target_label
    );
    let records = replay::run(&trace, config)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut printed = 0usize;
    for record in &records {
        if args.changes_only && record.events.is_empty() {
            continue;
        }
        serde_json::to_writer(&mut out, record)?;
        writeln!(out)?;
        printed += 1;
    }
    out.flush()?;
    log::info!("{} of {} records printed", printed, records.len());
    Ok(())
}
