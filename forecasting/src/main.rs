use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use data_ingestion::logger::init_logger;
use data_ingestion::{CachedFetcher, DataIngestionError, FetchRequest, PriceBar, Provider};
use forecasting::{
    AccuracyReport, AppConfig, ArtifactStore, Forecast, ForecastError, ModelKind, load_and_forecast,
    train_and_save,
};
use log::{error, info};
use serde::Serialize;

const EXIT_NO_DATA: u8 = 2;
const EXIT_ARTIFACT_MISSING: u8 = 3;
const EXIT_VALIDATION: u8 = 4;

#[derive(Parser, Debug)]
#[command(name = "spp")]
#[command(about = "Train next-day stock price models and forecast with them", long_about = None)]
struct Cli {
    /// Settings file; defaults to ./spp.toml when present
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides log_level from the settings
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch history, train, write the artifacts and print held-out accuracy
    Train {
        #[arg(short, long)]
        symbol: String,

        /// First day of history (YYYY-MM-DD); defaults to data.default_start
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Day after the last one to use (YYYY-MM-DD); defaults to today
        #[arg(long)]
        end: Option<NaiveDate>,

        #[arg(short, long, value_enum, default_value_t = ModelChoice::All)]
        model: ModelChoice,
    },
    /// Load the artifacts and compare predictions with recent prices
    Predict {
        #[arg(short, long)]
        symbol: String,

        #[arg(long)]
        start: Option<NaiveDate>,

        #[arg(long)]
        end: Option<NaiveDate>,

        #[arg(short, long, value_enum, default_value_t = ModelChoice::Tabular)]
        model: ModelChoice,

        /// Number of recent rows to print
        #[arg(long, default_value_t = 10)]
        last: usize,

        #[arg(long)]
        json: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ModelChoice {
    Tabular,
    Sequence,
    All,
}

impl ModelChoice {
    fn kinds(self) -> Vec<ModelKind> {
        match self {
            ModelChoice::Tabular => vec![ModelKind::Tabular],
            ModelChoice::Sequence => vec![ModelKind::Sequence],
            ModelChoice::All => ModelKind::ALL.to_vec(),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let cfg = match AppConfig::load(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            init_logger(cli.log_level.as_deref().unwrap_or("info"));
            error!("{e}");
            return ExitCode::from(EXIT_VALIDATION);
        }
    };
    init_logger(cli.log_level.as_deref().unwrap_or(&cfg.log_level));

    match run(cli.command, &cfg).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(e) = err.downcast_ref::<ForecastError>() {
        return match e {
            ForecastError::ArtifactMissing { .. } => EXIT_ARTIFACT_MISSING,
            e if e.is_validation() => EXIT_VALIDATION,
            _ => 1,
        };
    }
    match err.downcast_ref::<DataIngestionError>() {
        Some(e) if e.is_validation() => EXIT_VALIDATION,
        _ => 1,
    }
}

async fn fetch(
    cfg: &AppConfig,
    symbol: &str,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<(String, Vec<PriceBar>)> {
    let start = start.unwrap_or(cfg.data.default_start);
    let end = end.unwrap_or_else(|| Local::now().date_naive());
    let request = FetchRequest::new(symbol, start, end)?;

    let mut fetcher =
        CachedFetcher::with_capacity(Provider::from_config(&cfg.data)?, cfg.data.cache_capacity);
    let bars = fetcher.fetch(&request).await?;
    Ok((request.symbol, bars))
}

async fn run(command: Command, cfg: &AppConfig) -> Result<ExitCode> {
    let store = ArtifactStore::new(cfg.artifacts.clone());

    match command {
        Command::Train {
            symbol,
            start,
            end,
            model,
        } => {
            let (symbol, bars) = fetch(cfg, &symbol, start, end).await?;
            if bars.is_empty() {
                eprintln!("No data found for {symbol}. Check the ticker symbol.");
                return Ok(ExitCode::from(EXIT_NO_DATA));
            }
            info!("Training on {} bars for {symbol}", bars.len());

            for kind in model.kinds() {
                let summary = train_and_save(kind, cfg, &store, &bars)?;
                println!(
                    "{kind}: trained on {} samples, kept {} iterations, evaluated on {}",
                    summary.train_samples, summary.iterations, summary.test_samples
                );
                print_report(&summary.report);
            }
            println!("Artifacts written to {}", store.dir().display());
        }
        Command::Predict {
            symbol,
            start,
            end,
            model,
            last,
            json,
        } => {
            let (symbol, bars) = fetch(cfg, &symbol, start, end).await?;
            if bars.is_empty() {
                eprintln!("No data found for {symbol}. Check the ticker symbol.");
                return Ok(ExitCode::from(EXIT_NO_DATA));
            }

            for kind in model.kinds() {
                let forecast = load_and_forecast(kind, cfg, &store, &bars)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&PredictOutput::new(&symbol, &forecast, last)?)?);
                } else {
                    print_forecast(&symbol, &forecast, last)?;
                }
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[derive(Serialize)]
struct PredictOutput<'a> {
    symbol: &'a str,
    model: ModelKind,
    accuracy: AccuracyReport,
    recent: &'a [forecasting::ForecastRow],
    next: Option<forecasting::NextDayForecast>,
}

impl<'a> PredictOutput<'a> {
    fn new(symbol: &'a str, forecast: &'a Forecast, last: usize) -> Result<Self, ForecastError> {
        Ok(Self {
            symbol,
            model: forecast.kind,
            accuracy: forecast.accuracy()?,
            recent: forecast.tail(last),
            next: forecast.next,
        })
    }
}

fn print_report(report: &AccuracyReport) {
    let mape = report
        .mape
        .map(|m| format!("{:.2}%", m * 100.0))
        .unwrap_or_else(|| "n/a".to_string());
    println!(
        "  samples {:>5}  rmse {:>10.4}  mae {:>10.4}  mape {:>8}",
        report.samples, report.rmse, report.mae, mape
    );
    if report.undefined_pct > 0.0 {
        println!(
            "  {:.1}% of rows have a zero actual price; percentage error undefined",
            report.undefined_pct
        );
    }
}

fn print_forecast(symbol: &str, forecast: &Forecast, last: usize) -> Result<(), ForecastError> {
    println!("{symbol} - {} model", forecast.kind);
    println!(
        "{:<12} {:>12} {:>12} {:>10} {:>8}",
        "date", "actual", "predicted", "error", "error %"
    );
    for row in forecast.tail(last) {
        let pct = row
            .error_pct()
            .map(|p| format!("{p:.2}"))
            .unwrap_or_else(|| "n/a".to_string());
        println!(
            "{:<12} {:>12.4} {:>12.4} {:>10.4} {:>8}",
            row.date.to_string(),
            row.actual,
            row.predicted,
            row.error(),
            pct
        );
    }
    print_report(&forecast.accuracy()?);
    if let Some(next) = forecast.next {
        println!("Next trading day after {}: {:.4}", next.after, next.predicted);
    }
    Ok(())
}
