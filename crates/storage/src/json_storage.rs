//! JSON file storage implementation.
//!
//! Stores the estimator parameters (`params.json`) and retained samples
//! (`samples.json`) under a state directory. Every write goes to a uniquely
//! named temporary file in the same directory, is flushed to disk and then
//! renamed over the target, so a concurrent reader sees either the old or
//! the new content.

use std::path::{Path, PathBuf};

use picalc_core::{EstimatorParams, SampleEntry};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{Result, Storage};

const PARAMS_FILE: &str = "params.json";
const SAMPLES_FILE: &str = "samples.json";

/// File-based JSON storage backend.
#[derive(Debug, Clone)]
pub struct JsonStorage {
    root: PathBuf,
}

impl JsonStorage {
    /// Create storage, creating the state directory if needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// The state directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn params_path(&self) -> PathBuf {
        self.root.join(PARAMS_FILE)
    }

    fn samples_path(&self) -> PathBuf {
        self.root.join(SAMPLES_FILE)
    }
}

#[async_trait::async_trait]
impl Storage for JsonStorage {
    async fn load_params(&self) -> Result<Option<EstimatorParams>> {
        read_json(&self.params_path()).await
    }

    async fn save_params(&self, params: &EstimatorParams) -> Result<()> {
        let json = serde_json::to_string_pretty(params)?;
        write_atomic(&self.params_path(), json.as_bytes()).await
    }

    async fn load_samples(&self) -> Result<Vec<SampleEntry>> {
        Ok(read_json(&self.samples_path()).await?.unwrap_or_default())
    }

    async fn save_samples(&self, samples: &[SampleEntry]) -> Result<()> {
        let json = serde_json::to_string_pretty(samples)?;
        write_atomic(&self.samples_path(), json.as_bytes()).await
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write `bytes` to `path` via temp file + rename.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("state");
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, ulid::Ulid::new()));

    let written = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }

    debug!("Replaced {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_missing_files_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();

        assert!(storage.load_params().await.unwrap().is_none());
        assert!(storage.load_samples().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_params_persist_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let params = EstimatorParams::new(-12.5, 1.75, 8);

        JsonStorage::new(dir.path())
            .await
            .unwrap()
            .save_params(&params)
            .await
            .unwrap();

        let reopened = JsonStorage::new(dir.path()).await.unwrap();
        let loaded = reopened.load_params().await.unwrap().unwrap();
        assert_eq!(loaded, params);
    }

    #[tokio::test]
    async fn test_params_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        storage
            .save_params(&EstimatorParams::new(0.5, 2.0, 3))
            .await
            .unwrap();

        let raw = std::fs::read_to_string(dir.path().join(PARAMS_FILE)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["a"], 0.5);
        assert_eq!(json["b"], 2.0);
        assert_eq!(json["sample_count"], 3);
        assert!(json["fitted_at"].is_string());
    }

    #[tokio::test]
    async fn test_samples_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        let samples = vec![
            SampleEntry { n: 100, mean_duration: 0.01, count: 2 },
            SampleEntry { n: 1000, mean_duration: 0.2, count: 1 },
        ];
        storage.save_samples(&samples).await.unwrap();
        assert_eq!(storage.load_samples().await.unwrap(), samples);
    }

    #[tokio::test]
    async fn test_concurrent_writes_leave_a_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(JsonStorage::new(dir.path()).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..16u64 {
            let storage = storage.clone();
            handles.push(tokio::spawn(async move {
                let params = EstimatorParams::new(i as f64, 1.0, i);
                storage.save_params(&params).await.unwrap();
                // A reader racing the writers must always parse a complete file
                storage.load_params().await.unwrap().unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let loaded = storage.load_params().await.unwrap().unwrap();
        assert_eq!(loaded.a, loaded.sample_count as f64);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
