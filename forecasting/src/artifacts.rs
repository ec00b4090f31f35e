use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::ArtifactConfig;
use crate::error::ForecastError;
use crate::forecaster::ModelKind;

/// Scaler and model files for each model kind, kept side by side in one
/// directory. A pair is always written and read together.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    cfg: ArtifactConfig,
}

impl ArtifactStore {
    pub fn new(cfg: ArtifactConfig) -> Self {
        Self { cfg }
    }

    /// Store rooted at `dir` with the default file names.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(ArtifactConfig {
            dir: dir.into(),
            ..ArtifactConfig::default()
        })
    }

    pub fn dir(&self) -> &Path {
        &self.cfg.dir
    }

    /// `[scaler, model]` paths for `kind`.
    pub fn paths(&self, kind: ModelKind) -> [PathBuf; 2] {
        let (scaler, model) = match kind {
            ModelKind::Tabular => (&self.cfg.tabular_scaler, &self.cfg.tabular_model),
            ModelKind::Sequence => (&self.cfg.sequence_scaler, &self.cfg.sequence_model),
        };
        [self.cfg.dir.join(scaler), self.cfg.dir.join(model)]
    }

    pub fn missing(&self, kind: ModelKind) -> Vec<PathBuf> {
        self.paths(kind).into_iter().filter(|p| !p.is_file()).collect()
    }

    /// Overwrites both files of the pair, creating the directory if needed.
    pub fn save<S: Serialize, M: Serialize>(
        &self,
        kind: ModelKind,
        scaler: &S,
        model: &M,
    ) -> Result<[PathBuf; 2], ForecastError> {
        let [scaler_path, model_path] = self.paths(kind);
        let scaler_bytes = bincode::serialize(scaler)?;
        let model_bytes = bincode::serialize(model)?;

        fs::create_dir_all(&self.cfg.dir)?;
        fs::write(&scaler_path, scaler_bytes)?;
        fs::write(&model_path, model_bytes)?;
        info!(
            "Saved {kind} artifacts to {} and {}",
            scaler_path.display(),
            model_path.display()
        );
        Ok([scaler_path, model_path])
    }

    /// Fails with every missing path before reading either file.
    pub fn load<S: DeserializeOwned, M: DeserializeOwned>(
        &self,
        kind: ModelKind,
    ) -> Result<(S, M), ForecastError> {
        let missing = self.missing(kind);
        if !missing.is_empty() {
            return Err(ForecastError::ArtifactMissing { paths: missing });
        }
        let [scaler_path, model_path] = self.paths(kind);
        let scaler = bincode::deserialize(&fs::read(&scaler_path)?)?;
        let model = bincode::deserialize(&fs::read(&model_path)?)?;
        info!("Loaded {kind} artifacts from {}", self.cfg.dir.display());
        Ok((scaler, model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scaler::MinMaxScaler;

    #[test]
    fn test_save_creates_dir_and_load_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::in_dir(tmp.path().join("models"));
        let scaler = MinMaxScaler::fit(&[1.0, 3.0]).unwrap();
        let model = vec![0.5f64, -1.25];

        let [s, m] = store.save(ModelKind::Sequence, &scaler, &model).unwrap();
        assert!(s.ends_with("lstm_scaler.bin") && m.ends_with("lstm_model.bin"));

        let (scaler2, model2): (MinMaxScaler, Vec<f64>) = store.load(ModelKind::Sequence).unwrap();
        assert_eq!(scaler2, scaler);
        assert_eq!(model2, model);
    }

    #[test]
    fn test_save_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::in_dir(tmp.path());
        store.save(ModelKind::Tabular, &1u32, &vec![1.0f64; 100]).unwrap();
        store.save(ModelKind::Tabular, &2u32, &vec![2.0f64]).unwrap();
        let (s, m): (u32, Vec<f64>) = store.load(ModelKind::Tabular).unwrap();
        assert_eq!((s, m), (2, vec![2.0]));
    }

    #[test]
    fn test_missing_pair_member_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::in_dir(tmp.path());
        store.save(ModelKind::Tabular, &1u32, &2u32).unwrap();
        let [scaler_path, model_path] = store.paths(ModelKind::Tabular);
        fs::remove_file(&model_path).unwrap();

        let err = store.load::<u32, u32>(ModelKind::Tabular).unwrap_err();
        match &err {
            ForecastError::ArtifactMissing { paths } => assert_eq!(paths, &vec![model_path.clone()]),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.to_string().contains("spp train"));
        assert!(scaler_path.is_file());

        let err = store.load::<u32, u32>(ModelKind::Sequence).unwrap_err();
        assert!(matches!(err, ForecastError::ArtifactMissing { paths } if paths.len() == 2));
    }
}
