//! File descriptor limit detection for capping concurrent filesystem operations (Unix).

/// Estimated descriptors held per in-flight operation (the file itself plus directory handles).
pub const FDS_PER_OPERATION: usize = 2;

/// Fraction of the process FD limit to use (leave headroom for sockets and the cache backend).
const FD_LIMIT_FRACTION: f64 = 0.8;

/// Returns the soft limit for max open file descriptors, or `None` if unavailable (e.g. Windows).
#[cfg(unix)]
pub fn max_open_fds() -> Option<u64> {
    use std::mem::MaybeUninit;
    let mut rlim = MaybeUninit::<libc::rlimit>::uninit();
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, rlim.as_mut_ptr()) } != 0 {
        return None;
    }
    let rlim = unsafe { rlim.assume_init() };
    let cur = rlim.rlim_cur;
    // RLIM_INFINITY is typically !0 or u64::MAX; treat as "no practical limit"
    if cur == libc::RLIM_INFINITY || cur > i64::MAX as u64 {
        return None;
    }
    Some(cur as u64)
}

#[cfg(not(unix))]
pub fn max_open_fds() -> Option<u64> {
    None
}

/// Max concurrent filesystem operations that stay under ~80% of the FD limit.
/// Returns `None` if no limit is available (use caller's default).
pub fn max_operations_by_fd_limit() -> Option<usize> {
    let limit = max_open_fds()?;
    let usable = (limit as f64 * FD_LIMIT_FRACTION) as usize;
    if usable < FDS_PER_OPERATION {
        return Some(1);
    }
    Some(usable / FDS_PER_OPERATION)
}

/// Limiter capacity: the configured value, capped by the descriptor budget, never below 1.
pub fn limiter_capacity(configured: usize) -> usize {
    let capped = match max_operations_by_fd_limit() {
        Some(fd_cap) if fd_cap < configured => {
            log::debug!(
                "Capping filesystem concurrency {} -> {} (FD limit ~80%)",
                configured,
                fd_cap
            );
            fd_cap
        }
        _ => configured,
    };
    capped.max(1)
}

/// True when the error means the process or system ran out of descriptors (EMFILE / ENFILE).
#[cfg(unix)]
pub fn is_descriptor_exhaustion(err: &std::io::Error) -> bool {
    matches!(err.raw_os_error(), Some(code) if code == libc::EMFILE || code == libc::ENFILE)
}

#[cfg(not(unix))]
pub fn is_descriptor_exhaustion(err: &std::io::Error) -> bool {
    // ERROR_TOO_MANY_OPEN_FILES
    err.raw_os_error() == Some(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_never_zero() {
        assert!(limiter_capacity(0) >= 1);
        assert!(limiter_capacity(50) <= 50);
    }

    #[cfg(unix)]
    #[test]
    fn emfile_and_enfile_are_exhaustion() {
        assert!(is_descriptor_exhaustion(&std::io::Error::from_raw_os_error(libc::EMFILE)));
        assert!(is_descriptor_exhaustion(&std::io::Error::from_raw_os_error(libc::ENFILE)));
        assert!(!is_descriptor_exhaustion(&std::io::Error::from_raw_os_error(libc::ENOENT)));
        assert!(!is_descriptor_exhaustion(&std::io::Error::other("boom")));
    }
}
