use thiserror::Error;

use baton_storage::StoreError;

pub type Result<T> = std::result::Result<T, BatonError>;

#[derive(Debug, Error)]
pub enum BatonError {
    #[error("checkpoint manifest not found: '{0}' (nothing to resume from)")]
    ManifestNotFound(String),

    #[error("decryption failed: wrong secret or corrupted data")]
    WrongSecretOrCorrupt,

    #[error("checkpoint '{0}' is encrypted but no secret was provided")]
    EncryptedWithoutSecret(String),

    #[error("extraction requested volume {requested} but the manifest records {recorded}")]
    VolumeCountMismatch { requested: u32, recorded: u32 },

    #[error("archive would exceed the volume limit of {0}")]
    VolumeLimitExceeded(u32),

    #[error("upload of artifact '{name}' failed after {attempts} attempts")]
    UploadExhausted {
        name: String,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("key derivation error: {0}")]
    KeyDerivation(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("stage executor error: {0}")]
    Stage(String),

    #[error("{0}")]
    Other(String),
}
