use std::sync::atomic::{AtomicBool, Ordering};

static STOP: AtomicBool = AtomicBool::new(false);

/// Whether SIGINT/SIGTERM has been received. The stage executor polls this
/// and turns a hit into a timed-out outcome, so the invocation still gets
/// to checkpoint before exiting.
pub fn shutdown_requested() -> bool {
    STOP.load(Ordering::SeqCst)
}

/// Route SIGINT/SIGTERM into the stop flag. The first signal requests
/// checkpoint-and-exit; the default disposition is restored so a second
/// signal terminates immediately.
pub fn install_signal_handlers() {
    #[cfg(unix)]
    // Safety: the handler only stores to an atomic and resets the
    // disposition.
    unsafe {
        for sig in [libc::SIGINT, libc::SIGTERM] {
            libc::signal(sig, request_stop as *const () as libc::sighandler_t);
        }
    }
}

#[cfg(unix)]
extern "C" fn request_stop(sig: libc::c_int) {
    STOP.store(true, Ordering::SeqCst);
    unsafe {
        libc::signal(sig, libc::SIG_DFL);
    }
}
