//! Thread identity helpers

/// OS thread id of the calling thread
#[cfg(target_os = "linux")]
pub fn current_thread_id() -> u64 {
    // SAFETY: gettid takes no arguments and cannot fail
    unsafe { libc::syscall(libc::SYS_gettid) as u64 }
}

/// Stable per-thread id derived from the standard library's `ThreadId`
#[cfg(not(target_os = "linux"))]
pub fn current_thread_id() -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish()
}
