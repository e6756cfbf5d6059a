//! Framed AES-256-GCM over a byte stream.
//!
//! Wire format:
//!
//! ```text
//! [8-byte magic][16-byte salt][8-byte nonce prefix]
//! repeated: [u32 le ciphertext length][ciphertext (incl. 16-byte tag)]
//! ```
//!
//! The key is derived from the secret with Argon2id using the per-file salt.
//! Each frame's nonce is the random prefix plus a big-endian frame counter,
//! so reordered or replayed frames fail authentication. The stream ends with
//! an encrypted zero-length terminator frame; a missing terminator means the
//! file was truncated and decryption fails rather than producing a short
//! plaintext.

use std::io::{Read, Write};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{BatonError, Result};

const MAGIC: &[u8; 8] = b"BATONCR1";
const SALT_LEN: usize = 16;
const NONCE_PREFIX_LEN: usize = 8;
const TAG_LEN: usize = 16;
/// Plaintext bytes per frame.
const FRAME_LEN: usize = 4 * 1024 * 1024;

// Argon2id cost parameters (time, memory KiB, lanes).
const KDF_TIME_COST: u32 = 3;
const KDF_MEMORY_COST: u32 = 65536;
const KDF_PARALLELISM: u32 = 4;

fn derive_key(secret: &str, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let params = argon2::Params::new(KDF_MEMORY_COST, KDF_TIME_COST, KDF_PARALLELISM, Some(32))
        .map_err(|e| BatonError::KeyDerivation(format!("argon2 params: {e}")))?;
    let argon2 = argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let mut output = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(secret.as_bytes(), salt, output.as_mut())
        .map_err(|e| BatonError::KeyDerivation(format!("argon2 hash: {e}")))?;
    Ok(output)
}

fn frame_nonce(prefix: &[u8; NONCE_PREFIX_LEN], counter: u32) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..NONCE_PREFIX_LEN].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_LEN..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

pub fn encrypt_stream(reader: &mut dyn Read, writer: &mut dyn Write, secret: &str) -> Result<()> {
    let mut salt = [0u8; SALT_LEN];
    let mut prefix = [0u8; NONCE_PREFIX_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    rand::rngs::OsRng.fill_bytes(&mut prefix);

    writer.write_all(MAGIC)?;
    writer.write_all(&salt)?;
    writer.write_all(&prefix)?;

    let key = derive_key(secret, &salt)?;
    let cipher = Aes256Gcm::new_from_slice(key.as_ref())
        .map_err(|e| BatonError::KeyDerivation(format!("cipher init: {e}")))?;

    let mut buf = vec![0u8; FRAME_LEN];
    let mut counter: u32 = 0;
    loop {
        let n = read_full(reader, &mut buf)?;
        if n == 0 {
            break;
        }
        write_frame(writer, &cipher, &prefix, &mut counter, &buf[..n])?;
    }
    // Authenticated terminator so truncation is detectable.
    write_frame(writer, &cipher, &prefix, &mut counter, &[])?;
    Ok(())
}

pub fn decrypt_stream(reader: &mut dyn Read, writer: &mut dyn Write, secret: &str) -> Result<()> {
    let mut header = [0u8; 8 + SALT_LEN + NONCE_PREFIX_LEN];
    reader
        .read_exact(&mut header)
        .map_err(|_| BatonError::WrongSecretOrCorrupt)?;
    if &header[..8] != MAGIC {
        return Err(BatonError::WrongSecretOrCorrupt);
    }
    let salt = &header[8..8 + SALT_LEN];
    let mut prefix = [0u8; NONCE_PREFIX_LEN];
    prefix.copy_from_slice(&header[8 + SALT_LEN..]);

    let key = derive_key(secret, salt)?;
    let cipher = Aes256Gcm::new_from_slice(key.as_ref())
        .map_err(|e| BatonError::KeyDerivation(format!("cipher init: {e}")))?;

    let mut counter: u32 = 0;
    loop {
        let mut len_bytes = [0u8; 4];
        reader
            .read_exact(&mut len_bytes)
            .map_err(|_| BatonError::WrongSecretOrCorrupt)?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len < TAG_LEN || len > FRAME_LEN + TAG_LEN {
            return Err(BatonError::WrongSecretOrCorrupt);
        }

        let mut ciphertext = vec![0u8; len];
        reader
            .read_exact(&mut ciphertext)
            .map_err(|_| BatonError::WrongSecretOrCorrupt)?;

        let nonce = frame_nonce(&prefix, counter);
        counter = counter
            .checked_add(1)
            .ok_or(BatonError::WrongSecretOrCorrupt)?;

        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| BatonError::WrongSecretOrCorrupt)?;

        if plaintext.is_empty() {
            // Terminator frame. Trailing garbage after it is corruption.
            let mut rest = [0u8; 1];
            return match reader.read(&mut rest)? {
                0 => Ok(()),
                _ => Err(BatonError::WrongSecretOrCorrupt),
            };
        }
        writer.write_all(&plaintext)?;
    }
}

fn write_frame(
    writer: &mut dyn Write,
    cipher: &Aes256Gcm,
    prefix: &[u8; NONCE_PREFIX_LEN],
    counter: &mut u32,
    plaintext: &[u8],
) -> Result<()> {
    let nonce = frame_nonce(prefix, *counter);
    *counter = counter
        .checked_add(1)
        .ok_or_else(|| BatonError::Other("encryption frame counter overflow".into()))?;

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| BatonError::Other(format!("AES-GCM encrypt: {e}")))?;
    writer.write_all(&(ciphertext.len() as u32).to_le_bytes())?;
    writer.write_all(&ciphertext)?;
    Ok(())
}

/// Read until `buf` is full or EOF. Returns bytes read.
fn read_full(reader: &mut dyn Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
