use std::path::Path;
use std::time::Duration;

use crate::{BlobStore, Result, RetryConfig};

/// Upload an artifact with bounded attempts and a fixed delay between them.
///
/// Retries are local to this one upload; after the last attempt the final
/// error is returned and the caller decides whether that is fatal.
pub fn upload_with_retry(
    store: &dyn BlobStore,
    retry: &RetryConfig,
    name: &str,
    file: &Path,
    retention_days: Option<u32>,
) -> Result<()> {
    let attempts = retry.attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        if attempt > 1 {
            std::thread::sleep(Duration::from_millis(retry.delay_ms));
        }
        match store.upload(name, file, retention_days) {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() && attempt < attempts => {
                tracing::warn!(
                    artifact = name,
                    attempt,
                    attempts,
                    error = %e,
                    "upload failed, retrying"
                );
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.expect("at least one attempt was made"))
}
