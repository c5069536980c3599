use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use super::events::LifecycleEvent;

/// Durable, append-only record of each run's lifecycle events.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn append(&self, event: &LifecycleEvent) -> Result<()>;

    /// Events for `run_id` in the order they were appended; empty if the run is unknown.
    async fn load(&self, run_id: &str) -> Result<Vec<LifecycleEvent>>;

    async fn runs(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    runs: Arc<RwLock<BTreeMap<String, Vec<LifecycleEvent>>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn append(&self, event: &LifecycleEvent) -> Result<()> {
        let mut guard = self.runs.write().await;
        guard
            .entry(event.run_id().to_string())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Vec<LifecycleEvent>> {
        let guard = self.runs.read().await;
        Ok(guard.get(run_id).cloned().unwrap_or_default())
    }

    async fn runs(&self) -> Result<Vec<String>> {
        let guard = self.runs.read().await;
        Ok(guard.keys().cloned().collect())
    }
}

/// One JSON document per run under a state directory.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckpointFile {
    run_id: String,
    events: Vec<LifecycleEvent>,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: &str) -> Result<PathBuf> {
        let valid = !run_id.is_empty()
            && run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            anyhow::bail!("invalid run id '{}'", run_id);
        }
        Ok(self.dir.join(format!("{run_id}.json")))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn append(&self, event: &LifecycleEvent) -> Result<()> {
        let path = self.path_for(event.run_id())?;
        let run_id = event.run_id().to_string();
        let event = event.clone();

        let _guard = self.write_lock.lock().await;
        tokio::task::spawn_blocking(move || {
            let mut file = read_file(&path)?.unwrap_or_else(|| CheckpointFile {
                run_id,
                events: Vec::new(),
            });
            file.events.push(event);
            write_file(&path, &file)
        })
        .await
        .context("joining checkpoint persistence task")??;

        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Vec<LifecycleEvent>> {
        let path = self.path_for(run_id)?;
        let file = tokio::task::spawn_blocking(move || read_file(&path))
            .await
            .context("joining checkpoint read task")??;
        Ok(file.map(|file| file.events).unwrap_or_default())
    }

    async fn runs(&self) -> Result<Vec<String>> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || {
            if !dir.exists() {
                return Ok(Vec::new());
            }
            let mut runs = Vec::new();
            for entry in std::fs::read_dir(&dir)
                .with_context(|| format!("listing checkpoints in {}", dir.display()))?
            {
                let path = entry?.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                    runs.push(stem.to_string());
                }
            }
            runs.sort();
            Ok(runs)
        })
        .await
        .context("joining checkpoint listing task")?
    }
}

fn read_file(path: &Path) -> Result<Option<CheckpointFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading checkpoint at {}", path.display()))?;
    let file = serde_json::from_str(&raw)
        .with_context(|| format!("parsing checkpoint at {}", path.display()))?;
    Ok(Some(file))
}

fn write_file(path: &Path, file: &CheckpointFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating checkpoint directory {}", parent.display()))?;
    }
    let json = serde_json::to_vec_pretty(file).context("serializing checkpoint")?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)
        .with_context(|| format!("writing checkpoint to {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("replacing checkpoint at {}", path.display()))?;
    Ok(())
}
