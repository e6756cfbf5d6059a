//! File-path chunk transforms: zstd compression and authenticated
//! encryption.
//!
//! Every transform streams `input → output` on disk, deletes its input on
//! success, and errors if the input is missing. Whether a stored chunk is
//! encrypted is discoverable purely from its file name (`.enc` suffix), so
//! restore logic can react to what it finds before consulting anything else.

pub mod crypto;

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::error::{BatonError, Result};

pub const COMPRESSED_EXT: &str = "zst";
pub const ENCRYPTED_EXT: &str = "enc";

/// Whether a stored file name marks an encrypted chunk.
pub fn is_encrypted_name(name: &str) -> bool {
    name.ends_with(&format!(".{ENCRYPTED_EXT}"))
}

/// Compress `input` into `{input}.zst` and delete the input.
pub fn compress(input: &Path, level: i32) -> Result<PathBuf> {
    let output = append_ext(input, COMPRESSED_EXT);
    let reader = BufReader::new(File::open(input)?);
    let mut writer = BufWriter::new(File::create(&output)?);
    zstd::stream::copy_encode(reader, &mut writer, level)?;
    finish_transform(input, writer)?;
    Ok(output)
}

/// Decompress a `.zst` file back to its unsuffixed name and delete the input.
pub fn decompress(input: &Path) -> Result<PathBuf> {
    let output = strip_ext(input, COMPRESSED_EXT)?;
    let reader = BufReader::new(File::open(input)?);
    let mut writer = BufWriter::new(File::create(&output)?);
    zstd::stream::copy_decode(reader, &mut writer)?;
    finish_transform(input, writer)?;
    Ok(output)
}

/// Encrypt `input` into `{input}.enc` with a key derived from `secret` and
/// delete the input. Applied after compression on write.
pub fn encrypt(input: &Path, secret: &str) -> Result<PathBuf> {
    let output = append_ext(input, ENCRYPTED_EXT);
    let mut reader = BufReader::new(File::open(input)?);
    let mut writer = BufWriter::new(File::create(&output)?);
    crypto::encrypt_stream(&mut reader, &mut writer, secret)?;
    finish_transform(input, writer)?;
    Ok(output)
}

/// Decrypt a `.enc` file back to its unsuffixed name and delete the input.
/// Fails with `WrongSecretOrCorrupt` on any authentication failure.
pub fn decrypt(input: &Path, secret: &str) -> Result<PathBuf> {
    let output = strip_ext(input, ENCRYPTED_EXT)?;
    let mut reader = BufReader::new(File::open(input)?);
    let mut writer = BufWriter::new(File::create(&output)?);
    match crypto::decrypt_stream(&mut reader, &mut writer, secret) {
        Ok(()) => {}
        Err(e) => {
            // Never leave a partially-written plaintext behind.
            drop(writer);
            let _ = std::fs::remove_file(&output);
            return Err(e);
        }
    }
    finish_transform(input, writer)?;
    Ok(output)
}

fn finish_transform(input: &Path, writer: BufWriter<File>) -> Result<()> {
    use std::io::Write;
    let mut writer = writer;
    writer.flush()?;
    drop(writer);
    std::fs::remove_file(input)?;
    Ok(())
}

fn append_ext(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{ext}"));
    PathBuf::from(name)
}

fn strip_ext(path: &Path, ext: &str) -> Result<PathBuf> {
    let name = path.to_string_lossy();
    let suffix = format!(".{ext}");
    match name.strip_suffix(&suffix) {
        Some(stripped) => Ok(PathBuf::from(stripped)),
        None => Err(BatonError::Other(format!(
            "expected a '{suffix}' file, got '{name}'"
        ))),
    }
}
