use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, TrainError};

/// Bounded set of artifacts on disk, oldest evicted first.
///
/// After every [`push`](RotatingArtifactStore::push) fewer than `depth`
/// older artifacts remain besides the new one; with the default depth of 2
/// only the newest survives.
#[derive(Debug)]
pub struct RotatingArtifactStore {
    depth: usize,
    entries: VecDeque<PathBuf>,
}

impl RotatingArtifactStore {
    pub fn new(depth: usize) -> RotatingArtifactStore {
        RotatingArtifactStore {
            depth: depth.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Writes a new artifact through `write`, then evicts the oldest tracked
    /// artifacts. Pushing a path that is already tracked rewrites it in place.
    pub fn push<F>(&mut self, path: PathBuf, write: F) -> Result<()>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        write(&path)?;
        self.entries.retain(|p| p != &path);

        while self.entries.len() + 1 >= self.depth && !self.entries.is_empty() {
            self.evict_oldest()?;
        }
        self.entries.push_back(path);
        Ok(())
    }

    /// Deletes the oldest tracked artifact. No-op when nothing is tracked.
    pub fn evict_oldest(&mut self) -> Result<()> {
        let Some(oldest) = self.entries.pop_front() else {
            return Ok(());
        };
        match fs::remove_file(&oldest) {
            Ok(()) => {
                debug!(path = %oldest.display(), "evicted rotating artifact");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(TrainError::ArtifactRotation { path: oldest })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes every tracked artifact, oldest first.
    pub fn drain(&mut self) -> Result<()> {
        while !self.entries.is_empty() {
            self.evict_oldest()?;
        }
        Ok(())
    }

    pub fn entries(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(PathBuf::as_path)
    }

    pub fn newest(&self) -> Option<&Path> {
        self.entries.back().map(PathBuf::as_path)
    }
}
