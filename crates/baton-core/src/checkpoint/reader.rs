//! Checkpoint restoration: fetch the manifest, then feed volumes to the
//! archive joiner strictly in order, one ahead at most.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use baton_storage::{BlobStore, StoreError};

use crate::archive;
use crate::codec;
use crate::error::{BatonError, Result};

use super::{manifest_name, Manifest};

/// Restore the checkpoint `base` into `working_dir`, byte-for-byte.
pub fn restore(
    store: &dyn BlobStore,
    working_dir: &Path,
    base: &str,
    secret: Option<&str>,
) -> Result<()> {
    fs::create_dir_all(working_dir)?;
    let spool = super::writer::spool_dir(working_dir)?;

    let manifest = fetch_manifest(store, spool.path(), base)?;
    info!(
        base,
        volumes = manifest.chunk_count,
        encrypted = manifest.encrypted,
        "restoring checkpoint"
    );

    let first = fetch_volume(store, spool.path(), &manifest, 1, base, secret)?;

    let mut on_needed = |seq: u32| -> Result<Option<PathBuf>> {
        // The joiner asking past the recorded count is a protocol error;
        // abort rather than hang waiting for a volume that will never exist.
        if seq > manifest.chunk_count {
            return Err(BatonError::VolumeCountMismatch {
                requested: seq,
                recorded: manifest.chunk_count,
            });
        }
        fetch_volume(store, spool.path(), &manifest, seq, base, secret).map(Some)
    };

    archive::extract_chunked(working_dir, &first, &mut on_needed)
}

fn fetch_manifest(store: &dyn BlobStore, spool: &Path, base: &str) -> Result<Manifest> {
    let path = match store.download(&manifest_name(base), spool) {
        Ok(path) => path,
        Err(StoreError::NotFound(_)) => {
            return Err(BatonError::ManifestNotFound(base.to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    let manifest: Manifest = serde_json::from_slice(&fs::read(&path)?)?;
    fs::remove_file(&path)?;
    manifest.validate()?;
    Ok(manifest)
}

/// Download one volume and undo its stored transforms, yielding a plain
/// `.tar` volume file. Encryption is detected from the stored file name, so
/// a checkpoint written with a secret fails here — loudly — when restored
/// without one.
fn fetch_volume(
    store: &dyn BlobStore,
    spool: &Path,
    manifest: &Manifest,
    seq: u32,
    base: &str,
    secret: Option<&str>,
) -> Result<PathBuf> {
    let artifact = &manifest.volumes[(seq - 1) as usize];
    let downloaded = store.download(artifact, spool)?;
    debug!(artifact = %artifact, file = %downloaded.display(), "fetched volume");

    let file_name = downloaded
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    let decrypted = if codec::is_encrypted_name(&file_name) {
        let secret = secret.ok_or_else(|| BatonError::EncryptedWithoutSecret(base.to_string()))?;
        codec::decrypt(&downloaded, secret)?
    } else {
        downloaded
    };

    codec::decompress(&decrypted)
}
