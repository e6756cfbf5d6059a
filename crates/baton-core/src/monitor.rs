//! Background disk-usage poll. Logging only, never authoritative; the guard
//! cancels the thread deterministically on every exit path via `Drop`.

use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info};

/// RAII handle for the poll thread. Dropping it wakes and joins the thread.
pub struct DiskMonitor {
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DiskMonitor {
    pub fn start(path: PathBuf, interval: Duration) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name("baton-disk-monitor".into())
            .spawn(move || loop {
                match free_space(&path) {
                    Ok(bytes) => {
                        info!(
                            path = %path.display(),
                            free_mib = bytes / (1024 * 1024),
                            "disk space"
                        );
                    }
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "disk poll unavailable");
                        break;
                    }
                }
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    // Stop requested, or the guard was leaked and dropped.
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .ok();
        Self {
            stop_tx: Some(stop_tx),
            handle,
        }
    }
}

impl Drop for DiskMonitor {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(unix)]
fn free_space(path: &std::path::Path) -> std::io::Result<u64> {
    use std::os::unix::ffi::OsStrExt;

    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
    let mut stat = std::mem::MaybeUninit::<libc::statvfs>::uninit();
    // Safety: c_path is a valid NUL-terminated string and stat is sized for
    // the statvfs out-parameter.
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    let stat = unsafe { stat.assume_init() };
    Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
fn free_space(_path: &std::path::Path) -> std::io::Result<u64> {
    Err(std::io::Error::from(std::io::ErrorKind::Unsupported))
}
