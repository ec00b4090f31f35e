pub mod bar;
pub mod cache;
pub mod config;
pub mod csv_store;
pub mod error;
pub mod fetcher;
pub mod logger;

pub use bar::{PriceBar, PriceField};
pub use cache::CachedFetcher;
pub use error::DataIngestionError;
pub use fetcher::{FetchRequest, MarketDataProvider, Provider};
