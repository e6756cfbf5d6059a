//! Checkpoints: a complete, restorable snapshot of the build working tree,
//! stored as numbered volume artifacts plus a manifest artifact.

pub mod reader;
pub mod whole;
pub mod writer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use baton_storage::{BlobStore, RetryConfig};

use crate::error::{BatonError, Result};

/// Description of a completed checkpoint, stored as its own artifact
/// (`{base}-manifest`). Written once, after the last volume uploads; never
/// mutated. A checkpoint with no manifest does not exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    /// Artifact base name this checkpoint was written under.
    pub base: String,
    pub chunk_count: u32,
    /// Remote artifact names, in volume order.
    pub volumes: Vec<String>,
    pub encrypted: bool,
    pub created_at: DateTime<Utc>,
}

impl Manifest {
    pub fn new(base: &str, volumes: Vec<String>, encrypted: bool) -> Self {
        Self {
            version: 1,
            base: base.to_string(),
            chunk_count: volumes.len() as u32,
            volumes,
            encrypted,
            created_at: Utc::now(),
        }
    }

    /// Enforce the naming invariant: volume i is always `{base}-vol{i+1:03}`.
    /// A checkpoint always has at least one volume; an empty list means the
    /// manifest is corrupt or tampered.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_count == 0 {
            return Err(BatonError::InvalidManifest(
                "no volumes recorded".to_string(),
            ));
        }
        if self.volumes.len() != self.chunk_count as usize {
            return Err(BatonError::InvalidManifest(format!(
                "chunk_count {} does not match {} listed volumes",
                self.chunk_count,
                self.volumes.len()
            )));
        }
        for (i, name) in self.volumes.iter().enumerate() {
            let expected = volume_name(&self.base, i as u32 + 1);
            if *name != expected {
                return Err(BatonError::InvalidManifest(format!(
                    "volume {} is named '{name}', expected '{expected}'",
                    i + 1
                )));
            }
        }
        Ok(())
    }
}

/// File name of the manifest inside its artifact.
pub const MANIFEST_FILE: &str = "manifest.json";

pub fn volume_name(base: &str, seq: u32) -> String {
    format!("{base}-vol{seq:03}")
}

pub fn manifest_name(base: &str) -> String {
    format!("{base}-manifest")
}

/// How the working tree is checkpointed on this host. Selected once at
/// startup; the runner is agnostic to the choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointStrategy {
    /// Split the archive into size-limited volumes (disk-constrained hosts).
    #[default]
    Chunked,
    /// Single archive artifact (hosts with adequate local disk).
    Whole,
}

/// Tuning for checkpoint creation.
#[derive(Debug, Clone)]
pub struct CheckpointOptions {
    pub chunk_size_limit: u64,
    pub max_volumes: u32,
    pub compression_level: i32,
    pub retention_days: Option<u32>,
    pub retry: RetryConfig,
}

impl Default for CheckpointOptions {
    fn default() -> Self {
        Self {
            chunk_size_limit: 2 * 1024 * 1024 * 1024,
            max_volumes: 500,
            compression_level: 3,
            retention_days: None,
            retry: RetryConfig::default(),
        }
    }
}

/// Best-effort removal of a checkpoint's manifest and volume artifacts.
/// Used both to sweep stale blobs before a new write and to discard
/// checkpoints after terminal success. Never fails the surrounding
/// operation.
pub fn discard(store: &dyn BlobStore, base: &str, max_volumes: u32) {
    if let Err(e) = store.delete(&manifest_name(base)) {
        tracing::debug!(base, error = %e, "stale manifest delete failed");
    }
    for seq in 1..=max_volumes {
        if let Err(e) = store.delete(&volume_name(base, seq)) {
            tracing::debug!(base, seq, error = %e, "stale volume delete failed");
        }
    }
}

/// Strategy-dispatched save. `rel_paths` are consumed from `working_dir`.
pub fn save(
    strategy: CheckpointStrategy,
    store: &dyn BlobStore,
    working_dir: &std::path::Path,
    rel_paths: &[String],
    base: &str,
    secret: Option<&str>,
    opts: &CheckpointOptions,
) -> Result<u32> {
    match strategy {
        CheckpointStrategy::Chunked => {
            writer::write(store, working_dir, rel_paths, base, secret, opts)
        }
        CheckpointStrategy::Whole => {
            whole::write_whole(store, working_dir, rel_paths, base, secret, opts)?;
            Ok(1)
        }
    }
}

/// Strategy-dispatched restore into `working_dir`.
pub fn load(
    strategy: CheckpointStrategy,
    store: &dyn BlobStore,
    working_dir: &std::path::Path,
    base: &str,
    secret: Option<&str>,
) -> Result<()> {
    match strategy {
        CheckpointStrategy::Chunked => reader::restore(store, working_dir, base, secret),
        CheckpointStrategy::Whole => whole::restore_whole(store, working_dir, base, secret),
    }
}
