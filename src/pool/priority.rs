//! Scheduling priority for the coordinator and its workers
//!
//! Lowering is expressed as a floor: the niceness is raised to the target
//! only when it is currently below it, so repeated calls never compound.

use std::io;

/// Raise the calling thread's niceness to at least `niceness`.
///
/// Returns the niceness in effect afterwards.
#[cfg(unix)]
pub fn lower_priority(niceness: i32) -> io::Result<i32> {
    use nix::errno::Errno;
    use nix::libc;

    // getpriority may legitimately return -1, so errno has to be checked.
    Errno::clear();
    // SAFETY: plain syscall on the calling thread with no pointer arguments.
    let current = unsafe { libc::getpriority(libc::PRIO_PROCESS, 0) };
    if current == -1 && Errno::last() != Errno::UnknownErrno {
        return Err(io::Error::from(Errno::last()));
    }

    if current >= niceness {
        return Ok(current);
    }

    // SAFETY: as above.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, niceness) };
    Errno::result(rc).map_err(io::Error::from)?;
    Ok(niceness)
}

#[cfg(not(unix))]
pub fn lower_priority(niceness: i32) -> io::Result<i32> {
    tracing::debug!(niceness, "process priority is not adjusted on this platform");
    Ok(0)
}

/// Apply `niceness` if configured, logging instead of failing
pub(crate) fn apply(niceness: Option<i32>) {
    let Some(niceness) = niceness else {
        return;
    };
    match lower_priority(niceness) {
        Ok(effective) => tracing::trace!(niceness = effective, "scheduling priority lowered"),
        Err(e) => tracing::warn!(niceness, error = %e, "failed to lower scheduling priority"),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_lowering_is_idempotent() {
        // Runs on its own thread so the rest of the test binary keeps its priority.
        std::thread::spawn(|| {
            let first = lower_priority(5).unwrap();
            assert!(first >= 5);
            let second = lower_priority(5).unwrap();
            assert_eq!(first, second);

            // Asking for a smaller niceness never raises priority back up.
            let third = lower_priority(1).unwrap();
            assert_eq!(third, second);
        })
        .join()
        .unwrap();
    }
}
