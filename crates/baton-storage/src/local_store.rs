use std::fs;
use std::path::{Path, PathBuf};

use crate::{validate_name, BlobStore, Result, StoreError};

/// Artifact store on a local filesystem directory: one subdirectory per
/// artifact name, holding the artifact's single file. Useful for testing and
/// for hosts that mount shared storage directly.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        // Canonicalize for correct behavior with symlinked roots.
        let root = fs::canonicalize(root)?;
        Ok(Self { root })
    }

    fn artifact_dir(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    /// The single file inside an artifact directory, if present.
    fn member_file(dir: &Path) -> Result<Option<PathBuf>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                return Ok(Some(entry.path()));
            }
        }
        Ok(None)
    }

    /// Copy `src` to `dest` via a temp file in the destination directory,
    /// then atomically rename into place.
    fn atomic_copy(src: &Path, dest: &Path) -> Result<()> {
        let dir = dest
            .parent()
            .ok_or_else(|| StoreError::Other(format!("no parent for {}", dest.display())))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        let mut reader = fs::File::open(src)?;
        std::io::copy(&mut reader, &mut tmp)?;
        tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}

impl BlobStore for LocalStore {
    fn upload(&self, name: &str, file: &Path, _retention_days: Option<u32>) -> Result<()> {
        let dir = self.artifact_dir(name)?;
        // Replace any previous artifact under this name wholesale.
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&dir)?;
        let file_name = file
            .file_name()
            .ok_or_else(|| StoreError::Other(format!("no file name in {}", file.display())))?;
        Self::atomic_copy(file, &dir.join(file_name))
    }

    fn download(&self, name: &str, dest_dir: &Path) -> Result<PathBuf> {
        let dir = self.artifact_dir(name)?;
        let member = Self::member_file(&dir)?
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        let file_name = member.file_name().expect("member file has a name");
        let dest = dest_dir.join(file_name);
        Self::atomic_copy(&member, &dest)?;
        Ok(dest)
    }

    fn delete(&self, name: &str) -> Result<()> {
        let dir = self.artifact_dir(name)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, name: &str) -> Result<bool> {
        let dir = self.artifact_dir(name)?;
        Ok(Self::member_file(&dir)?.is_some())
    }
}
