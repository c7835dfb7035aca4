//! Scheduling priority for the data path threads (`maxprio`).

use tracing::{debug, warn};

/// Niceness requested for reader and writer threads.
const RAISED_NICENESS: libc::c_int = -10;

/// Raise the scheduling priority of the calling thread.
///
/// Failures (usually missing privileges) are logged and otherwise ignored.
#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
pub fn raise_current_thread() {
    // SAFETY: gettid has no preconditions; setpriority only reads its scalar
    // arguments. On Linux PRIO_PROCESS with a thread id targets that thread.
    let result = unsafe {
        let tid = libc::syscall(libc::SYS_gettid) as libc::id_t;
        libc::setpriority(libc::PRIO_PROCESS, tid, RAISED_NICENESS)
    };
    if result == 0 {
        debug!(niceness = RAISED_NICENESS, "raised thread priority");
    } else {
        warn!(
            error = %std::io::Error::last_os_error(),
            "could not raise thread priority"
        );
    }
}

/// Raise the scheduling priority of the calling thread.
///
/// Not supported on this platform; logs and returns.
#[cfg(not(target_os = "linux"))]
pub fn raise_current_thread() {
    warn!("raising thread priority is only supported on Linux");
}
