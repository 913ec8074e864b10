use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::checkpoint::history::LossHistory;
use crate::checkpoint::rotating::RotatingArtifactStore;
use crate::checkpoint::snapshot::Snapshot;
use crate::error::{Result, TrainError};
use crate::model::parameter::ModelState;

/// Intermediate loss histories kept on disk at once, counting the new one.
const HISTORY_ROTATION_DEPTH: usize = 2;

/// Where a run's artifacts live under the log directory.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> ArtifactLayout {
        ArtifactLayout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn best_model(&self, name: &str, epochs: usize) -> PathBuf {
        self.root.join("models").join(format!("bestmodel-{name}-epochs{epochs}.bin"))
    }

    pub fn intermediate_history(&self, name: &str, epoch: usize, epochs: usize) -> PathBuf {
        self.root.join("loss").join(format!("loss-{name}-epoch{epoch}on{epochs}.json"))
    }

    pub fn final_history(&self, name: &str, epochs_done: usize) -> PathBuf {
        self.root.join("loss").join(format!("loss-{name}-epochs{epochs_done}.json"))
    }
}

/// Reads the resume snapshot on every rank and writes artifacts on the
/// leader only. Write methods return `Ok(true)` when they touched disk and
/// `Ok(false)` on the other ranks.
#[derive(Debug)]
pub struct CheckpointStore {
    layout: ArtifactLayout,
    snapshot_path: PathBuf,
    is_leader: bool,
    histories: RotatingArtifactStore,
}

impl CheckpointStore {
    pub fn new(layout: ArtifactLayout, snapshot_path: impl Into<PathBuf>, is_leader: bool) -> CheckpointStore {
        CheckpointStore {
            layout,
            snapshot_path: snapshot_path.into(),
            is_leader,
            histories: RotatingArtifactStore::new(HISTORY_ROTATION_DEPTH),
        }
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader
    }

    /// `None` when no snapshot exists yet. A snapshot that exists but cannot
    /// be decoded is fatal.
    pub fn load_snapshot(&self) -> Result<Option<Snapshot>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        Snapshot::load(&self.snapshot_path)
            .map(Some)
            .map_err(|source| TrainError::SnapshotLoad {
                path: self.snapshot_path.clone(),
                source: Box::new(source),
            })
    }

    pub fn save_snapshot(&self, snapshot: &Snapshot) -> Result<bool> {
        if !self.is_leader {
            return Ok(false);
        }
        ensure_parent(&self.snapshot_path)?;
        snapshot.save(&self.snapshot_path)?;
        info!(
            epoch = snapshot.epochs_run,
            path = %self.snapshot_path.display(),
            "training snapshot saved"
        );
        Ok(true)
    }

    /// Overwrites the best-model artifact of this run.
    pub fn save_best_model(&self, name: &str, epochs: usize, state: &ModelState) -> Result<bool> {
        if !self.is_leader {
            return Ok(false);
        }
        let path = self.layout.best_model(name, epochs);
        ensure_parent(&path)?;
        bincode::serialize_into(BufWriter::new(File::create(&path)?), state)?;
        debug!(path = %path.display(), "best model written");
        Ok(true)
    }

    /// Writes the history as of `epoch` and evicts the previous intermediate.
    pub fn save_intermediate_history(
        &mut self,
        name: &str,
        epoch: usize,
        epochs: usize,
        history: &LossHistory,
    ) -> Result<bool> {
        if !self.is_leader {
            return Ok(false);
        }
        let path = self.layout.intermediate_history(name, epoch, epochs);
        ensure_parent(&path)?;
        self.histories.push(path, |p| history.save_json(p))?;
        Ok(true)
    }

    /// Writes the complete history, named after the number of epochs the
    /// run reached, and removes the remaining intermediate.
    pub fn save_final_history(&mut self, name: &str, epochs_done: usize, history: &LossHistory) -> Result<bool> {
        if !self.is_leader {
            return Ok(false);
        }
        let path = self.layout.final_history(name, epochs_done);
        ensure_parent(&path)?;
        history.save_json(&path)?;
        self.histories.drain()?;
        info!(path = %path.display(), epochs = epochs_done, "final loss history written");
        Ok(true)
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
