use chrono::NaiveDate;
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "spp.toml";
pub const ENV_PREFIX: &str = "SPP";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Yahoo,
    Csv,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub provider: ProviderKind,
    pub yahoo_base_url: String,
    pub csv_dir: String,
    pub timeout_secs: u64,
    /// Unbounded when absent.
    pub cache_capacity: Option<usize>,
    pub default_start: NaiveDate,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Yahoo,
            yahoo_base_url: "https://query1.finance.yahoo.com".to_string(),
            csv_dir: "data".to_string(),
            timeout_secs: 30,
            cache_capacity: None,
            default_start: NaiveDate::from_ymd_opt(2018, 1, 1).unwrap_or_default(),
        }
    }
}

impl DataConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        #[derive(Deserialize, Default)]
        #[serde(default)]
        struct Root {
            data: DataConfig,
        }
        let root: Root = load_settings(None)?;
        Ok(root.data)
    }
}

/// Layers an optional TOML file under `SPP_*` environment variables
/// (`SPP_TABULAR__MAX_ROUNDS=500` sets `tabular.max_rounds`).
///
/// An explicit `path` must exist; the default `spp.toml` is optional.
pub fn load_settings<T: DeserializeOwned>(path: Option<&Path>) -> Result<T, ConfigError> {
    let file = match path {
        Some(p) => File::new(&p.to_string_lossy(), FileFormat::Toml).required(true),
        None => File::new(DEFAULT_CONFIG_FILE, FileFormat::Toml).required(false),
    };

    let cfg = Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    cfg.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[derive(Deserialize, Default)]
    #[serde(default)]
    struct Root {
        data: DataConfig,
    }

    #[test]
    fn test_defaults_without_file() {
        let cfg = DataConfig::default();
        assert_eq!(cfg.provider, ProviderKind::Yahoo);
        assert_eq!(cfg.default_start, NaiveDate::from_ymd_opt(2018, 1, 1).unwrap());
        assert!(cfg.cache_capacity.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[data]\nprovider = \"csv\"\ncsv_dir = \"fixtures\"\ncache_capacity = 4\ndefault_start = \"2020-06-01\""
        )
        .unwrap();

        let root: Root = load_settings(Some(file.path())).unwrap();
        assert_eq!(root.data.provider, ProviderKind::Csv);
        assert_eq!(root.data.csv_dir, "fixtures");
        assert_eq!(root.data.cache_capacity, Some(4));
        assert_eq!(root.data.timeout_secs, 30);
        assert_eq!(root.data.default_start, NaiveDate::from_ymd_opt(2020, 6, 1).unwrap());
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let res: Result<Root, _> = load_settings(Some(Path::new("/nonexistent/spp.toml")));
        assert!(res.is_err());
    }
}
