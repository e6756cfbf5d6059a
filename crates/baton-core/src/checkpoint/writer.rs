//! Checkpoint creation: drive the archive splitter and push each volume
//! through compress → (encrypt) → upload → local delete as it completes.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use baton_storage::{upload_with_retry, BlobStore};

use crate::archive;
use crate::codec;
use crate::error::{BatonError, Result};

use super::{discard, manifest_name, volume_name, CheckpointOptions, Manifest, MANIFEST_FILE};

/// Write a checkpoint of `rel_paths` under `working_dir` to the store as
/// `base`. Returns the number of volumes uploaded.
///
/// The source tree is consumed (moved into the archive), not copied; callers
/// needing to retain it must copy first. Any upload that exhausts its
/// retries fails the whole write — no manifest is published over a partial
/// volume set, so a later restore fails cleanly with `ManifestNotFound`.
pub fn write(
    store: &dyn BlobStore,
    working_dir: &Path,
    rel_paths: &[String],
    base: &str,
    secret: Option<&str>,
    opts: &CheckpointOptions,
) -> Result<u32> {
    // A previous cycle's blobs under this name are superseded; sweep them
    // before writing so a crash mid-write cannot leave a stale manifest
    // pointing at a mix of old and new volumes.
    discard(store, base, opts.max_volumes);

    let spool = spool_dir(working_dir)?;
    let mut volumes: Vec<String> = Vec::new();

    let trailing = {
        let mut on_boundary = |done: &Path, next_seq: u32| -> Result<Option<PathBuf>> {
            let seq = next_seq - 1;
            process_volume(store, done, base, seq, secret, opts, &mut volumes)?;
            if next_seq > opts.max_volumes {
                return Ok(None);
            }
            Ok(Some(spool.path().join(chunk_file_name(next_seq))))
        };

        archive::create_chunked(
            working_dir,
            rel_paths,
            opts.chunk_size_limit,
            &spool.path().join(chunk_file_name(1)),
            &mut on_boundary,
        )?
    };

    // The boundary callback fires only between volumes; the final volume is
    // processed here, explicitly, through the identical sequence.
    process_volume(
        store,
        &trailing.path,
        base,
        trailing.seq,
        secret,
        opts,
        &mut volumes,
    )?;

    let manifest = Manifest::new(base, volumes, secret.is_some());
    upload_manifest(store, spool.path(), &manifest, opts)?;

    info!(
        base,
        volumes = manifest.chunk_count,
        encrypted = manifest.encrypted,
        "checkpoint written"
    );
    Ok(manifest.chunk_count)
}

/// Compress, optionally encrypt, and upload one completed volume, then
/// delete the local file and record its remote name.
fn process_volume(
    store: &dyn BlobStore,
    chunk_path: &Path,
    base: &str,
    seq: u32,
    secret: Option<&str>,
    opts: &CheckpointOptions,
    volumes: &mut Vec<String>,
) -> Result<()> {
    let compressed = codec::compress(chunk_path, opts.compression_level)?;
    let upload_path = match secret {
        Some(secret) => codec::encrypt(&compressed, secret)?,
        None => compressed,
    };

    let name = volume_name(base, seq);
    debug!(artifact = %name, file = %upload_path.display(), "uploading volume");
    upload_with_retry(store, &opts.retry, &name, &upload_path, opts.retention_days).map_err(
        |e| BatonError::UploadExhausted {
            name: name.clone(),
            attempts: opts.retry.attempts,
            source: e,
        },
    )?;

    fs::remove_file(&upload_path)?;
    volumes.push(name);
    Ok(())
}

fn upload_manifest(
    store: &dyn BlobStore,
    spool: &Path,
    manifest: &Manifest,
    opts: &CheckpointOptions,
) -> Result<()> {
    let path = spool.join(MANIFEST_FILE);
    fs::write(&path, serde_json::to_vec_pretty(manifest)?)?;

    let name = manifest_name(&manifest.base);
    upload_with_retry(store, &opts.retry, &name, &path, opts.retention_days).map_err(|e| {
        BatonError::UploadExhausted {
            name: name.clone(),
            attempts: opts.retry.attempts,
            source: e,
        }
    })?;
    fs::remove_file(&path)?;
    Ok(())
}

fn chunk_file_name(seq: u32) -> String {
    format!("vol{seq:03}.tar")
}

/// Volume spool directory beside the working dir, so chunk files land on the
/// same filesystem that the disk budget was planned for.
pub(super) fn spool_dir(working_dir: &Path) -> Result<tempfile::TempDir> {
    let parent = working_dir.parent().unwrap_or(working_dir);
    fs::create_dir_all(parent)?;
    Ok(tempfile::Builder::new()
        .prefix("baton-spool-")
        .tempdir_in(parent)?)
}
