//! Whole-archive variant: one artifact, no volume bookkeeping. Shares the
//! codec and retry contracts with the chunked path and is interchangeable
//! with it at the runner seam.

use std::fs;
use std::path::Path;

use tracing::info;

use baton_storage::{upload_with_retry, BlobStore, StoreError};

use crate::archive;
use crate::codec;
use crate::error::{BatonError, Result};

use super::{writer::spool_dir, CheckpointOptions};

/// Archive, compress, optionally encrypt, and upload `rel_paths` as the
/// single artifact `name`. Consumes the source tree like the chunked writer.
pub fn write_whole(
    store: &dyn BlobStore,
    working_dir: &Path,
    rel_paths: &[String],
    name: &str,
    secret: Option<&str>,
    opts: &CheckpointOptions,
) -> Result<()> {
    // Supersede any previous archive under this name; best-effort.
    if let Err(e) = store.delete(name) {
        tracing::debug!(name, error = %e, "stale archive delete failed");
    }

    let spool = spool_dir(working_dir)?;
    let tar_path = spool.path().join("archive.tar");
    archive::create_whole(working_dir, rel_paths, &tar_path)?;

    let compressed = codec::compress(&tar_path, opts.compression_level)?;
    let upload_path = match secret {
        Some(secret) => codec::encrypt(&compressed, secret)?,
        None => compressed,
    };

    upload_with_retry(store, &opts.retry, name, &upload_path, opts.retention_days).map_err(
        |e| BatonError::UploadExhausted {
            name: name.to_string(),
            attempts: opts.retry.attempts,
            source: e,
        },
    )?;
    fs::remove_file(&upload_path)?;

    info!(name, encrypted = secret.is_some(), "whole archive written");
    Ok(())
}

/// Download and unpack the single artifact `name` into `working_dir`.
///
/// A missing artifact maps to `ManifestNotFound` so the runner's "nothing to
/// resume from" handling is strategy-agnostic.
pub fn restore_whole(
    store: &dyn BlobStore,
    working_dir: &Path,
    name: &str,
    secret: Option<&str>,
) -> Result<()> {
    fs::create_dir_all(working_dir)?;
    let spool = spool_dir(working_dir)?;

    let downloaded = match store.download(name, spool.path()) {
        Ok(path) => path,
        Err(StoreError::NotFound(_)) => return Err(BatonError::ManifestNotFound(name.to_string())),
        Err(e) => return Err(e.into()),
    };

    let file_name = downloaded
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    let decrypted = if codec::is_encrypted_name(&file_name) {
        let secret = secret.ok_or_else(|| BatonError::EncryptedWithoutSecret(name.to_string()))?;
        codec::decrypt(&downloaded, secret)?
    } else {
        downloaded
    };
    let tar_path = codec::decompress(&decrypted)?;

    archive::extract_whole(working_dir, &tar_path)?;
    info!(name, "whole archive restored");
    Ok(())
}
