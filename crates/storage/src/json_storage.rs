//! JSON file storage implementation.
//!
//! Each run gets its own directory:
//!
//! ```text
//! <root>/<run_id>/generations/<index>.json   checkpoint per generation
//! <root>/<run_id>/history.json               full RunReport
//! <root>/<run_id>/best_metaprompt.txt        winning instruction, plain text
//! ```

use std::path::{Path, PathBuf};
use metaevo_core::{Generation, RunId, RunReport};
use super::{ArtifactStore, Result};
use tokio::fs;
use tracing::{debug, info};

const HISTORY_FILE: &str = "history.json";
const BEST_FILE: &str = "best_metaprompt.txt";
const GENERATIONS_DIR: &str = "generations";

/// File-based JSON storage backend.
pub struct JsonStorage {
    root: PathBuf,
}

impl JsonStorage {
    /// Create storage rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one run's artifacts.
    pub fn run_dir(&self, run_id: RunId) -> PathBuf {
        self.root.join(run_id.to_string())
    }

    fn generation_path(&self, run_id: RunId, index: usize) -> PathBuf {
        self.run_dir(run_id)
            .join(GENERATIONS_DIR)
            .join(format!("{:04}.json", index))
    }

    fn history_path(&self, run_id: RunId) -> PathBuf {
        self.run_dir(run_id).join(HISTORY_FILE)
    }

    /// Path of the plain-text best metaprompt.
    pub fn best_metaprompt_path(&self, run_id: RunId) -> PathBuf {
        self.run_dir(run_id).join(BEST_FILE)
    }
}

#[async_trait::async_trait]
impl ArtifactStore for JsonStorage {
    async fn save_generation(&self, run_id: RunId, generation: &Generation) -> Result<()> {
        let path = self.generation_path(run_id, generation.index);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(generation)?;
        fs::write(&path, json.as_bytes()).await?;
        debug!("Checkpointed generation {} to {}", generation.index, path.display());
        Ok(())
    }

    async fn save_report(&self, report: &RunReport) -> Result<()> {
        let dir = self.run_dir(report.run_id);
        fs::create_dir_all(&dir).await?;

        let json = serde_json::to_string_pretty(report)?;
        fs::write(self.history_path(report.run_id), json.as_bytes()).await?;

        if let Some(best) = report.best_metaprompt() {
            fs::write(self.best_metaprompt_path(report.run_id), best.as_bytes()).await?;
        }

        info!("Saved run {} ({} generations) to {}", report.run_id, report.history.len(), dir.display());
        Ok(())
    }

    async fn load_report(&self, run_id: RunId) -> Result<Option<RunReport>> {
        read_json(&self.history_path(run_id)).await
    }

    async fn list_runs(&self) -> Result<Vec<RunId>> {
        let mut runs = Vec::new();
        let mut rd = fs::read_dir(&self.root).await?;
        while let Some(entry) = rd.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Ok(run_id) = name.parse::<RunId>() else {
                continue;
            };
            if fs::try_exists(self.history_path(run_id)).await? {
                runs.push(run_id);
            }
        }
        runs.sort_by_key(|id| id.to_string());
        Ok(runs)
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

#[cfg(test)]
mod tests {
    use super::*;
    use metaevo_core::{
        Candidate, Explanations, Fitness, Provenance, RunHistory, RunStatus, SubScores,
    };

    fn generation(index: usize, text: &str) -> Generation {
        let best = Candidate::new(text, Provenance::InitialBase, index).with_evaluation(
            Fitness {
                sub_scores: SubScores::default(),
                combined_score: 1.0,
                explanations: Explanations::default(),
            },
            Vec::new(),
        );
        Generation {
            index,
            candidates: vec![best.clone()],
            parents: vec![best.clone()],
            best_parent: best,
            tie_break: None,
            evaluation_failures: Vec::new(),
            started_at: chrono::Utc::now(),
            finished_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_save_and_load_report() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();

        let mut history = RunHistory::new();
        history.push(generation(0, "first"));
        history.push(generation(1, "second"));
        let report = RunReport {
            run_id: RunId::new(),
            status: RunStatus::Completed,
            best: history.last().map(|g| g.best_parent.clone()),
            history,
            started_at: chrono::Utc::now(),
            finished_at: chrono::Utc::now(),
        };

        storage.save_report(&report).await.unwrap();

        let loaded = storage.load_report(report.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.history.len(), 2);
        let indices: Vec<usize> = loaded.history.iter().map(|g| g.index).collect();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(loaded.best_metaprompt(), Some("second"));

        let best = tokio::fs::read_to_string(storage.best_metaprompt_path(report.run_id))
            .await
            .unwrap();
        assert_eq!(best, "second");

        assert_eq!(storage.list_runs().await.unwrap(), vec![report.run_id]);
    }

    #[tokio::test]
    async fn test_load_missing_report() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        assert!(storage.load_report(RunId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_generation_checkpoint_written() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        let run_id = RunId::new();

        storage.save_generation(run_id, &generation(3, "x")).await.unwrap();

        let path = storage.run_dir(run_id).join("generations").join("0003.json");
        let json = tokio::fs::read_to_string(path).await.unwrap();
        let parsed: Generation = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.index, 3);
        // A checkpoint alone is not a finished run.
        assert!(storage.list_runs().await.unwrap().is_empty());
    }
}
