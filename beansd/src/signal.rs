//! Process-wide quit flag and signal installation.
//!
//! SIGTERM, SIGQUIT, and SIGINT set the flag; the event loops, the flush
//! task, and the main thread poll it and wind down cooperatively. SIGPIPE is
//! ignored — send failures surface as `EPIPE` from the write path.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

static QUIT: AtomicBool = AtomicBool::new(false);

/// Whether a process-wide quit was signalled.
pub fn quit_requested() -> bool {
    QUIT.load(Ordering::Relaxed)
}

extern "C" fn handle_quit_signal(_sig: libc::c_int) {
    // Only the atomic store: anything else is not async-signal-safe.
    QUIT.store(true, Ordering::Relaxed);
}

/// Install the quit handler on SIGTERM/SIGQUIT/SIGINT and ignore SIGPIPE.
pub fn install() -> io::Result<()> {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = handle_quit_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        libc::sigemptyset(&mut sa.sa_mask);
        for sig in [libc::SIGTERM, libc::SIGQUIT, libc::SIGINT] {
            if libc::sigaction(sig, &sa, std::ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
        }

        let mut ign: libc::sigaction = std::mem::zeroed();
        ign.sa_sigaction = libc::SIG_IGN;
        libc::sigemptyset(&mut ign.sa_mask);
        if libc::sigaction(libc::SIGPIPE, &ign, std::ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
