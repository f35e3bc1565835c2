//! Immutable checkpoints and where they are kept.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use graph::{GraphSnapshot, KnowledgeGraph};

use crate::error::{Result, VersionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointId(pub Uuid);

impl CheckpointId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CheckpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for CheckpointId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointStats {
    pub entity_count: usize,
    pub relationship_count: usize,
    pub latest_scene: Option<u32>,
}

impl CheckpointStats {
    pub fn of(graph: &KnowledgeGraph) -> Self {
        Self {
            entity_count: graph.entity_count(),
            relationship_count: graph.relationship_count(),
            latest_scene: graph.latest_scene(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub label: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub stats: CheckpointStats,
    pub snapshot: GraphSnapshot,
}

impl Checkpoint {
    pub fn capture(
        graph: &KnowledgeGraph,
        label: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: CheckpointId::new(),
            label: label.into(),
            description: description.into(),
            created_at: Utc::now(),
            stats: CheckpointStats::of(graph),
            snapshot: graph.to_snapshot(),
        }
    }

    pub fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            id: self.id,
            label: self.label.clone(),
            description: self.description.clone(),
            created_at: self.created_at,
            stats: self.stats,
        }
    }
}

/// A checkpoint without its snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub id: CheckpointId,
    pub label: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub stats: CheckpointStats,
}

/// Checkpoints for one project, held in memory and optionally mirrored to a
/// directory as one `<id>.json` file each.
pub struct CheckpointStore {
    dir: Option<PathBuf>,
    checkpoints: RwLock<BTreeMap<CheckpointId, Arc<Checkpoint>>>,
}

impl CheckpointStore {
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            checkpoints: RwLock::new(BTreeMap::new()),
        }
    }

    /// Open a directory-backed store, loading every checkpoint file found.
    /// Files that cannot be read or parsed are skipped.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut checkpoints = BTreeMap::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_checkpoint(&path) {
                Ok(checkpoint) => {
                    checkpoints.insert(checkpoint.id, Arc::new(checkpoint));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable checkpoint file")
                }
            }
        }

        info!(dir = %dir.display(), count = checkpoints.len(), "Checkpoint store opened");
        Ok(Self {
            dir: Some(dir),
            checkpoints: RwLock::new(checkpoints),
        })
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn len(&self) -> usize {
        self.checkpoints.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.read().is_empty()
    }

    pub fn insert(&self, checkpoint: Checkpoint) -> Result<CheckpointSummary> {
        if let Some(dir) = &self.dir {
            write_checkpoint(dir, &checkpoint)?;
        }
        let summary = checkpoint.summary();
        self.checkpoints.write().insert(checkpoint.id, Arc::new(checkpoint));
        Ok(summary)
    }

    pub fn get(&self, id: CheckpointId) -> Result<Arc<Checkpoint>> {
        self.checkpoints
            .read()
            .get(&id)
            .cloned()
            .ok_or(VersionError::CheckpointNotFound(id))
    }

    /// Newest first.
    pub fn list(&self) -> Vec<CheckpointSummary> {
        let mut summaries: Vec<CheckpointSummary> =
            self.checkpoints.read().values().map(|c| c.summary()).collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        summaries
    }

    pub fn remove(&self, id: CheckpointId) -> Result<CheckpointSummary> {
        let removed = self
            .checkpoints
            .write()
            .remove(&id)
            .ok_or(VersionError::CheckpointNotFound(id))?;
        if let Some(dir) = &self.dir {
            let path = checkpoint_path(dir, id);
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(removed.summary())
    }
}

fn checkpoint_path(dir: &Path, id: CheckpointId) -> PathBuf {
    dir.join(format!("{id}.json"))
}

fn read_checkpoint(path: &Path) -> Result<Checkpoint> {
    let json = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

fn write_checkpoint(dir: &Path, checkpoint: &Checkpoint) -> Result<()> {
    let path = checkpoint_path(dir, checkpoint.id);
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_string_pretty(checkpoint)?)?;
    fs::rename(&tmp, &path)?;
    Ok(())
}
