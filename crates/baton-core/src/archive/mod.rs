//! Sequential archive driver: streams a tar of the working tree into
//! size-limited volume files (create) and joins volumes back into one tar
//! stream (extract).
//!
//! The boundary callback protocol is deliberately asymmetric: during create
//! the callback fires only *between* volumes, so the final volume is left
//! on disk when the source is exhausted and handed back as an explicit
//! [`TrailingChunk`] for the caller to process. Skipping that step loses the
//! tail of every archive; it is a named type so it cannot be forgotten
//! silently.
//!
//! Source files are deleted as they are archived (move semantics), keeping
//! peak disk usage at roughly one volume above the remaining tree instead of
//! doubling it.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{BatonError, Result};

/// The final, still-open volume left behind by [`create_chunked`]. The
/// caller must run it through the same process as every boundary volume.
#[derive(Debug)]
pub struct TrailingChunk {
    pub path: PathBuf,
    pub seq: u32,
}

/// Called between volumes during create: `(completed_path, next_seq)` must
/// synchronously return the path to continue writing to, or `None` to stop
/// because the volume limit is exceeded.
pub type OnChunkBoundary<'a> = dyn FnMut(&Path, u32) -> Result<Option<PathBuf>> + 'a;

/// Called between volumes during extract: returns the path of the requested
/// volume, or `None` when the sequence is exhausted.
pub type OnChunkNeeded<'a> = dyn FnMut(u32) -> Result<Option<PathBuf>> + 'a;

/// Archive `rel_paths` under `source_dir` into volumes of at most
/// `chunk_size_limit` bytes, starting at `first_chunk`. Returns the trailing
/// volume. Archived files are removed from the source tree.
pub fn create_chunked(
    source_dir: &Path,
    rel_paths: &[String],
    chunk_size_limit: u64,
    first_chunk: &Path,
    on_boundary: &mut OnChunkBoundary<'_>,
) -> Result<TrailingChunk> {
    if chunk_size_limit == 0 {
        return Err(BatonError::Config("chunk_size_limit must be > 0".into()));
    }

    let sink = SplitWriter::new(first_chunk, chunk_size_limit, on_boundary)?;
    let mut builder = tar::Builder::new(sink);
    builder.follow_symlinks(false);

    for rel in rel_paths {
        let abs = source_dir.join(rel);
        if let Err(e) = append_consuming(&mut builder, source_dir, &abs) {
            return Err(recover_callback_error(e, builder.get_mut()));
        }
    }

    // Finish before into_inner: the terminator blocks can straddle the size
    // limit and rotate, and a callback error there must still be recoverable
    // from the sink.
    if let Err(e) = builder.finish() {
        return Err(recover_callback_error(e, builder.get_mut()));
    }
    let mut sink = builder.into_inner()?;
    sink.flush()?;
    if let Some(err) = sink.callback_error.take() {
        return Err(err);
    }

    debug!(
        volumes = sink.seq,
        trailing = %sink.path.display(),
        "archive stream complete, trailing volume left for caller"
    );
    Ok(TrailingChunk {
        path: sink.path,
        seq: sink.seq,
    })
}

/// Join volumes starting at `first_chunk` and unpack the tar stream into
/// `dest_dir`. Each consumed volume file is deleted once its successor is
/// ready, so at most two volumes are resident at any time.
pub fn extract_chunked(
    dest_dir: &Path,
    first_chunk: &Path,
    on_needed: &mut OnChunkNeeded<'_>,
) -> Result<()> {
    fs::create_dir_all(dest_dir)?;
    let reader = VolumeReader::new(first_chunk, on_needed)?;
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);

    if let Err(e) = archive.unpack(dest_dir) {
        let reader = archive.into_inner();
        return Err(recover_reader_error(e, reader));
    }

    let reader = archive.into_inner();
    // The last volume has been fully consumed; reclaim it.
    let _ = fs::remove_file(&reader.path);
    Ok(())
}

/// Single-volume create used by the whole-archive variant. Same consuming
/// walk, no size limit.
pub fn create_whole(source_dir: &Path, rel_paths: &[String], archive_path: &Path) -> Result<()> {
    let file = File::create(archive_path)?;
    let mut builder = tar::Builder::new(file);
    builder.follow_symlinks(false);
    for rel in rel_paths {
        let abs = source_dir.join(rel);
        append_consuming(&mut builder, source_dir, &abs)?;
    }
    let mut file = builder.into_inner()?;
    file.flush()?;
    Ok(())
}

/// Single-volume extract. Deletes the archive file after unpacking.
pub fn extract_whole(dest_dir: &Path, archive_path: &Path) -> Result<()> {
    fs::create_dir_all(dest_dir)?;
    let file = File::open(archive_path)?;
    let mut archive = tar::Archive::new(file);
    archive.set_preserve_permissions(true);
    archive.unpack(dest_dir)?;
    fs::remove_file(archive_path)?;
    Ok(())
}

/// Append `abs` (file, dir, or symlink) to the archive under its path
/// relative to `base`, deleting each entry as it is consumed. Directory
/// children are visited in name order for deterministic volume contents.
fn append_consuming<W: Write>(
    builder: &mut tar::Builder<W>,
    base: &Path,
    abs: &Path,
) -> io::Result<()> {
    let rel = abs
        .strip_prefix(base)
        .map_err(|_| io::Error::other(format!("{} is outside {}", abs.display(), base.display())))?;
    let meta = fs::symlink_metadata(abs)?;

    if meta.is_dir() {
        builder.append_dir(rel, abs)?;
        let mut entries: Vec<PathBuf> = fs::read_dir(abs)?
            .map(|e| e.map(|e| e.path()))
            .collect::<io::Result<_>>()?;
        entries.sort();
        for entry in entries {
            append_consuming(builder, base, &entry)?;
        }
        fs::remove_dir(abs)?;
    } else {
        builder.append_path_with_name(abs, rel)?;
        fs::remove_file(abs)?;
    }
    Ok(())
}

/// `Write` sink that splits the archive stream into fixed-size volume files,
/// invoking the boundary callback between volumes.
struct SplitWriter<'a, 'b> {
    file: File,
    path: PathBuf,
    written: u64,
    limit: u64,
    /// 1-based sequence number of the volume currently being written.
    seq: u32,
    on_boundary: &'a mut OnChunkBoundary<'b>,
    /// Real error from the boundary callback, smuggled past the `io::Error`
    /// boundary that `tar::Builder` imposes.
    callback_error: Option<BatonError>,
}

impl<'a, 'b> SplitWriter<'a, 'b> {
    fn new(
        first_chunk: &Path,
        limit: u64,
        on_boundary: &'a mut OnChunkBoundary<'b>,
    ) -> Result<Self> {
        Ok(Self {
            file: File::create(first_chunk)?,
            path: first_chunk.to_path_buf(),
            written: 0,
            limit,
            seq: 1,
            on_boundary,
            callback_error: None,
        })
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        let next_seq = self.seq + 1;
        match (self.on_boundary)(&self.path, next_seq) {
            Ok(Some(next_path)) => {
                self.file = File::create(&next_path)?;
                self.path = next_path;
                self.seq = next_seq;
                self.written = 0;
                Ok(())
            }
            Ok(None) => {
                self.callback_error = Some(BatonError::VolumeLimitExceeded(self.seq));
                Err(io::Error::other("volume limit exceeded"))
            }
            Err(e) => {
                self.callback_error = Some(e);
                Err(io::Error::other("chunk boundary callback failed"))
            }
        }
    }
}

impl Write for SplitWriter<'_, '_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.written == self.limit {
            self.rotate()?;
        }
        let room = (self.limit - self.written).min(buf.len() as u64) as usize;
        let n = self.file.write(&buf[..room])?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// `Read` source that chains volume files back into one stream, fetching
/// each next volume on demand and deleting the one just finished.
struct VolumeReader<'a, 'b> {
    file: File,
    path: PathBuf,
    /// Sequence number the next boundary will request.
    next_seq: u32,
    on_needed: &'a mut OnChunkNeeded<'b>,
    exhausted: bool,
    callback_error: Option<BatonError>,
}

impl<'a, 'b> VolumeReader<'a, 'b> {
    fn new(first_chunk: &Path, on_needed: &'a mut OnChunkNeeded<'b>) -> Result<Self> {
        Ok(Self {
            file: File::open(first_chunk)?,
            path: first_chunk.to_path_buf(),
            next_seq: 2,
            on_needed,
            exhausted: false,
            callback_error: None,
        })
    }
}

impl Read for VolumeReader<'_, '_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.exhausted {
                return Ok(0);
            }
            let n = self.file.read(buf)?;
            if n > 0 {
                return Ok(n);
            }
            // Current volume drained: fetch the next one, then reclaim the
            // old file so at most two volumes are ever resident.
            match (self.on_needed)(self.next_seq) {
                Ok(Some(next_path)) => {
                    let next_file = File::open(&next_path)?;
                    let _ = fs::remove_file(&self.path);
                    self.file = next_file;
                    self.path = next_path;
                    self.next_seq += 1;
                }
                Ok(None) => {
                    self.exhausted = true;
                    let _ = fs::remove_file(&self.path);
                }
                Err(e) => {
                    self.callback_error = Some(e);
                    return Err(io::Error::other("chunk fetch callback failed"));
                }
            }
        }
    }
}

fn recover_callback_error(io_err: io::Error, sink: &mut SplitWriter<'_, '_>) -> BatonError {
    match sink.callback_error.take() {
        Some(err) => err,
        None => io_err.into(),
    }
}

fn recover_reader_error(io_err: io::Error, mut reader: VolumeReader<'_, '_>) -> BatonError {
    match reader.callback_error.take() {
        Some(err) => err,
        None => io_err.into(),
    }
}
