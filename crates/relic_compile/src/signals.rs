//! Fatal-signal handling.
//!
//! On SIGINT/SIGTERM/SIGHUP/SIGQUIT the process forwards SIGTERM to a
//! running child compiler, waits for it, unlinks its registered temp files
//! and re-raises the signal. The handler body is async-signal-safe: it
//! calls only `signal`, `waitpid`, `kill`, `unlink` and `raise`.

use std::sync::atomic::{AtomicI32, Ordering};

use crate::tempfiles;

static COMPILER_PID: AtomicI32 = AtomicI32::new(0);

const FATAL_SIGNALS: [libc::c_int; 4] =
    [libc::SIGINT, libc::SIGTERM, libc::SIGHUP, libc::SIGQUIT];

/// Records the pid of a child compiler the handler should manage; 0 means
/// none.
pub fn set_compiler_pid(pid: i32) {
    COMPILER_PID.store(pid, Ordering::SeqCst);
}

extern "C" fn handle_fatal_signal(signum: libc::c_int) {
    unsafe {
        // Restore the default action so the re-raise below terminates us.
        libc::signal(signum, libc::SIG_DFL);

        let pid = COMPILER_PID.load(Ordering::SeqCst);
        if signum == libc::SIGTERM
            && pid != 0
            && libc::waitpid(pid, std::ptr::null_mut(), libc::WNOHANG) == 0
        {
            libc::kill(pid, signum);
        }

        tempfiles::cleanup_pending();

        if pid != 0 {
            libc::waitpid(pid, std::ptr::null_mut(), 0);
        }

        libc::raise(signum);
    }
}

/// Installs the fatal-signal handlers. All fatal signals are masked while
/// the handler runs.
pub fn install() {
    unsafe {
        let mut mask: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut mask);
        for sig in FATAL_SIGNALS {
            libc::sigaddset(&mut mask, sig);
        }

        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handle_fatal_signal as usize;
        action.sa_mask = mask;
        action.sa_flags = libc::SA_RESTART;

        for sig in FATAL_SIGNALS {
            libc::sigaction(sig, &action, std::ptr::null_mut());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_roundtrip() {
        set_compiler_pid(1234);
        assert_eq!(COMPILER_PID.load(Ordering::SeqCst), 1234);
        set_compiler_pid(0);
        assert_eq!(COMPILER_PID.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn install_does_not_panic() {
        install();
    }
}
