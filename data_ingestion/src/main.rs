use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use chrono::{Local, NaiveDate};
use clap::Parser;
use log::{error, info};

use data_ingestion::config::DataConfig;
use data_ingestion::csv_store::write_bars_csv;
use data_ingestion::logger::init_logger;
use data_ingestion::{CachedFetcher, FetchRequest, Provider};

#[derive(Parser, Debug)]
#[command(name = "data_ingestion")]
#[command(about = "Download daily OHLCV history for a ticker into a CSV file", long_about = None)]
struct Args {
    /// Ticker symbol, e.g. AAPL or RELIANCE.NS
    #[arg(short, long)]
    symbol: String,

    /// First day to include (YYYY-MM-DD); defaults to data.default_start
    #[arg(long)]
    start: Option<NaiveDate>,

    /// Day after the last one to include (YYYY-MM-DD); defaults to today
    #[arg(long)]
    end: Option<NaiveDate>,

    /// Output file; defaults to <csv_dir>/<SYMBOL>.csv
    #[arg(short, long)]
    out: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    init_logger(&args.log_level);

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let cfg = DataConfig::from_env()?;
    let start = args.start.unwrap_or(cfg.default_start);
    let end = args.end.unwrap_or_else(|| Local::now().date_naive());
    let request = FetchRequest::new(&args.symbol, start, end)?;

    let mut fetcher = CachedFetcher::with_capacity(Provider::from_config(&cfg)?, cfg.cache_capacity);
    let bars = fetcher.fetch(&request).await?;

    if bars.is_empty() {
        eprintln!("No data found for {}. Check the ticker symbol.", request.symbol);
        return Ok(ExitCode::from(2));
    }

    let out = args
        .out
        .unwrap_or_else(|| PathBuf::from(&cfg.csv_dir).join(format!("{}.csv", request.symbol)));
    write_bars_csv(&out, &bars)?;
    info!(
        "Saved {} rows for {} ({} .. {})",
        bars.len(),
        request.symbol,
        bars[0].date,
        bars[bars.len() - 1].date
    );

    Ok(ExitCode::SUCCESS)
}
