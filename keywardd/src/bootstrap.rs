/// Process hardening applied before any key material enters memory.
///
/// Call first thing in `main()`, after logging is initialised but before
/// any identity is loaded. Both steps are best-effort: failure is logged
/// and the daemon continues.
///
/// 1. `PR_SET_DUMPABLE 0` disables core dumps and `/proc/<pid>/mem`
///    access by non-root processes.
/// 2. `mlockall(MCL_CURRENT | MCL_FUTURE)` keeps every page resident so
///    key material is never swapped to disk. Needs `CAP_IPC_LOCK`.
#[cfg(unix)]
pub fn harden_process() {
    // SAFETY: prctl with PR_SET_DUMPABLE and integer arguments.
    let ret = unsafe { libc::prctl(libc::PR_SET_DUMPABLE, 0i64, 0i64, 0i64, 0i64) };
    if ret == 0 {
        tracing::info!("core dumps and /proc/pid/mem access disabled");
    } else {
        let err = std::io::Error::last_os_error();
        tracing::warn!("PR_SET_DUMPABLE=0 failed (non-fatal): {err}");
    }

    // SAFETY: mlockall has no memory-safety preconditions.
    let ret = unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) };
    if ret == 0 {
        tracing::info!("all memory pages locked in RAM");
    } else {
        // EPERM without CAP_IPC_LOCK is the common case.
        let err = std::io::Error::last_os_error();
        tracing::warn!("mlockall failed, running without memory locking: {err}");
    }
}

#[cfg(not(unix))]
pub fn harden_process() {}
