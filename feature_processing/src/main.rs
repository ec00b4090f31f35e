use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use data_ingestion::PriceField;
use data_ingestion::csv_store::read_bars_csv;
use data_ingestion::logger::init_logger;
use feature_processing::build_features;
use log::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "feature_processing")]
#[command(about = "Turn a daily OHLCV CSV into the engineered feature table", long_about = None)]
struct Args {
    /// Bars CSV written by data_ingestion
    #[arg(short, long)]
    input: PathBuf,

    /// Feature table destination
    #[arg(short, long)]
    out: PathBuf,

    /// Price column feeding the features: open, high, low or close
    #[arg(long, default_value = "close")]
    field: PriceField,

    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    init_logger(&args.log_level);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let bars = read_bars_csv(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let table = build_features(&bars, args.field)?;

    if table.is_empty() {
        warn!(
            "{} bars are not enough history for a single complete feature row",
            bars.len()
        );
    }
    table.write_csv(&args.out)?;
    info!(
        "{} of {} rows carry a next-day label",
        table.labeled_len(),
        table.len()
    );
    Ok(())
}
