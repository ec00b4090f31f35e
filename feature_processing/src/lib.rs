pub mod error;
pub mod indicators;
pub mod processor;
pub mod table;
pub mod window;

pub use error::FeatureError;
pub use processor::build_features;
pub use table::{FEATURE_NAMES, FeatureRow, FeatureTable, Features, Label, NUM_FEATURES, WARMUP};
