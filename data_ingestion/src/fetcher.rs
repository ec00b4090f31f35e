use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime};
use log::{debug, info, warn};
use reqwest::Client;
use serde::Deserialize;

use crate::bar::{PriceBar, normalize_bars};
use crate::config::{DataConfig, ProviderKind};
use crate::csv_store::CsvProvider;
use crate::error::DataIngestionError;

/// Daily history for one symbol over `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchRequest {
    pub symbol: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl FetchRequest {
    pub fn new(symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Self, DataIngestionError> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(DataIngestionError::EmptySymbol);
        }
        if start >= end {
            return Err(DataIngestionError::InvalidDateRange { start, end });
        }
        Ok(Self { symbol, start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }
}

/// Source of OHLCV history. An unknown symbol or an empty range yields
/// `Ok(vec![])`, never an error.
pub trait MarketDataProvider {
    fn name(&self) -> &'static str;

    fn fetch(
        &self,
        request: &FetchRequest,
    ) -> impl Future<Output = Result<Vec<PriceBar>, DataIngestionError>>;
}

pub struct YahooProvider {
    client: Client,
    base_url: String,
}

impl YahooProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DataIngestionError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (compatible; spp/0.1)")
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn chart_url(&self, request: &FetchRequest) -> String {
        let period1 = request.start.and_time(NaiveTime::MIN).and_utc().timestamp();
        let period2 = request.end.and_time(NaiveTime::MIN).and_utc().timestamp();
        format!(
            "{}/v8/finance/chart/{}?period1={}&period2={}&interval=1d&events=history",
            self.base_url, request.symbol, period1, period2
        )
    }
}

impl MarketDataProvider for YahooProvider {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<PriceBar>, DataIngestionError> {
        let url = self.chart_url(request);
        info!("Requesting {} history from {}", request.symbol, self.base_url);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        // Unknown symbols come back as 404 with a structured chart error.
        match parse_chart(&body) {
            Ok(bars) => Ok(bars.into_iter().filter(|b| request.contains(b.date)).collect()),
            Err(e) if status.is_success() => Err(e),
            Err(DataIngestionError::SerdeJsonError(_)) => Err(DataIngestionError::HttpStatus {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            }),
            Err(e) => Err(e),
        }
    }
}

#[derive(Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Deserialize)]
struct ChartResult {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Deserialize)]
struct ChartMeta {
    gmtoffset: Option<i64>,
}

#[derive(Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Quote {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<f64>>,
}

/// Decodes a v8 chart payload into ordered daily bars.
pub fn parse_chart(body: &str) -> Result<Vec<PriceBar>, DataIngestionError> {
    let response: ChartResponse = serde_json::from_str(body)?;

    if let Some(err) = response.chart.error {
        if err.code.eq_ignore_ascii_case("Not Found") {
            info!("Provider does not know this symbol: {}", err.description);
            return Ok(Vec::new());
        }
        return Err(DataIngestionError::Provider {
            code: err.code,
            description: err.description,
        });
    }

    let Some(result) = response.chart.result.and_then(|r| r.into_iter().next()) else {
        return Ok(Vec::new());
    };
    let Some(timestamps) = result.timestamp else {
        return Ok(Vec::new());
    };
    let Some(quote) = result.indicators.quote.into_iter().next() else {
        return Ok(Vec::new());
    };
    let offset = result.meta.and_then(|m| m.gmtoffset).unwrap_or(0);

    let mut bars = Vec::with_capacity(timestamps.len());
    for (i, ts) in timestamps.iter().enumerate() {
        let field = |col: &Vec<Option<f64>>| col.get(i).copied().flatten();
        let (Some(open), Some(high), Some(low), Some(close)) = (
            field(&quote.open),
            field(&quote.high),
            field(&quote.low),
            field(&quote.close),
        ) else {
            debug!("Skipping incomplete bar at timestamp {}", ts);
            continue;
        };
        let Some(dt) = DateTime::from_timestamp(ts + offset, 0) else {
            warn!("Skipping bar with out-of-range timestamp {}", ts);
            continue;
        };
        let volume = field(&quote.volume).unwrap_or(0.0).max(0.0) as u64;
        bars.push(PriceBar::new(dt.date_naive(), open, high, low, close, volume));
    }

    Ok(normalize_bars(bars))
}

/// Provider chosen by configuration.
pub enum Provider {
    Yahoo(YahooProvider),
    Csv(CsvProvider),
}

impl Provider {
    pub fn from_config(cfg: &DataConfig) -> Result<Self, DataIngestionError> {
        Ok(match cfg.provider {
            ProviderKind::Yahoo => Provider::Yahoo(YahooProvider::new(
                &cfg.yahoo_base_url,
                Duration::from_secs(cfg.timeout_secs),
            )?),
            ProviderKind::Csv => Provider::Csv(CsvProvider::new(&cfg.csv_dir)),
        })
    }
}

impl MarketDataProvider for Provider {
    fn name(&self) -> &'static str {
        match self {
            Provider::Yahoo(p) => p.name(),
            Provider::Csv(p) => p.name(),
        }
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<PriceBar>, DataIngestionError> {
        match self {
            Provider::Yahoo(p) => p.fetch(request).await,
            Provider::Csv(p) => p.fetch(request).await,
        }
    }
}
