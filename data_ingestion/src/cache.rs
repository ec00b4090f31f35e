use std::collections::{HashMap, VecDeque};

use log::{debug, info};

use crate::bar::PriceBar;
use crate::error::DataIngestionError;
use crate::fetcher::{FetchRequest, MarketDataProvider};

/// Memoizes provider results for the lifetime of the process.
///
/// Keys are whole requests (symbol, start, end). Empty results are cached
/// like any other; failures are not. With a capacity set, the least recently
/// used entry is evicted once the map is full.
pub struct CachedFetcher<P> {
    provider: P,
    entries: HashMap<FetchRequest, Vec<PriceBar>>,
    recency: VecDeque<FetchRequest>,
    capacity: Option<usize>,
}

impl<P: MarketDataProvider> CachedFetcher<P> {
    pub fn new(provider: P) -> Self {
        Self::with_capacity(provider, None)
    }

    pub fn with_capacity(provider: P, capacity: Option<usize>) -> Self {
        Self {
            provider,
            entries: HashMap::new(),
            recency: VecDeque::new(),
            capacity: capacity.filter(|c| *c > 0),
        }
    }

    /// Returns the memoized bars for `request`, fetching on a miss. The
    /// binaries issue one request per run, so hits only occur for callers
    /// that keep a fetcher across requests.
    pub async fn fetch(&mut self, request: &FetchRequest) -> Result<Vec<PriceBar>, DataIngestionError> {
        if let Some(bars) = self.entries.get(request) {
            debug!(
                "Cache hit for {} {}..{}",
                request.symbol, request.start, request.end
            );
            let bars = bars.clone();
            self.touch(request);
            return Ok(bars);
        }

        let bars = self.provider.fetch(request).await?;
        info!(
            "Fetched {} bars for {} from {}",
            bars.len(),
            request.symbol,
            self.provider.name()
        );
        self.insert(request.clone(), bars.clone());
        Ok(bars)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn touch(&mut self, request: &FetchRequest) {
        if let Some(pos) = self.recency.iter().position(|k| k == request) {
            if let Some(key) = self.recency.remove(pos) {
                self.recency.push_back(key);
            }
        }
    }

    fn insert(&mut self, key: FetchRequest, bars: Vec<PriceBar>) {
        if let Some(capacity) = self.capacity {
            while self.entries.len() >= capacity {
                let Some(oldest) = self.recency.pop_front() else {
                    break;
                };
                debug!("Evicting cached history for {}", oldest.symbol);
                self.entries.remove(&oldest);
            }
        }
        self.recency.push_back(key.clone());
        self.entries.insert(key, bars);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::cell::Cell;

    struct CountingProvider {
        calls: Cell<usize>,
        fail: bool,
    }

    impl CountingProvider {
        fn new() -> Self {
            Self {
                calls: Cell::new(0),
                fail: false,
            }
        }
    }

    impl MarketDataProvider for CountingProvider {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn fetch(&self, request: &FetchRequest) -> Result<Vec<PriceBar>, DataIngestionError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err(DataIngestionError::Provider {
                    code: "Unavailable".into(),
                    description: "try later".into(),
                });
            }
            if request.symbol == "UNKNOWN" {
                return Ok(Vec::new());
            }
            Ok(vec![PriceBar::new(request.start, 1.0, 1.0, 1.0, 1.0, 0)])
        }
    }

    fn req(symbol: &str, day: u32) -> FetchRequest {
        FetchRequest::new(
            symbol,
            NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_identical_requests_hit_cache() {
        let mut fetcher = CachedFetcher::new(CountingProvider::new());
        let a = fetcher.fetch(&req("AAPL", 1)).await.unwrap();
        let b = fetcher.fetch(&req("aapl", 1)).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(fetcher.provider().calls.get(), 1);

        fetcher.fetch(&req("AAPL", 2)).await.unwrap();
        assert_eq!(fetcher.provider().calls.get(), 2);
        assert_eq!(fetcher.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_results_are_cached() {
        let mut fetcher = CachedFetcher::new(CountingProvider::new());
        assert!(fetcher.fetch(&req("UNKNOWN", 1)).await.unwrap().is_empty());
        assert!(fetcher.fetch(&req("UNKNOWN", 1)).await.unwrap().is_empty());
        assert_eq!(fetcher.provider().calls.get(), 1);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let provider = CountingProvider {
            calls: Cell::new(0),
            fail: true,
        };
        let mut fetcher = CachedFetcher::new(provider);
        assert!(fetcher.fetch(&req("AAPL", 1)).await.is_err());
        assert!(fetcher.fetch(&req("AAPL", 1)).await.is_err());
        assert_eq!(fetcher.provider().calls.get(), 2);
        assert!(fetcher.is_empty());
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recent() {
        let mut fetcher = CachedFetcher::with_capacity(CountingProvider::new(), Some(2));
        fetcher.fetch(&req("A", 1)).await.unwrap();
        fetcher.fetch(&req("B", 1)).await.unwrap();
        // Touch A so B becomes the eviction candidate.
        fetcher.fetch(&req("A", 1)).await.unwrap();
        fetcher.fetch(&req("C", 1)).await.unwrap();
        assert_eq!(fetcher.len(), 2);
        assert_eq!(fetcher.provider().calls.get(), 3);

        fetcher.fetch(&req("A", 1)).await.unwrap();
        assert_eq!(fetcher.provider().calls.get(), 3);
        fetcher.fetch(&req("B", 1)).await.unwrap();
        assert_eq!(fetcher.provider().calls.get(), 4);
    }
}
