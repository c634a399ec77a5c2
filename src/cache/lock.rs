use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Lock a process-wide mutex, recovering the guard if a previous holder panicked.
///
/// Shared cache and monitor state only holds counters and key sets, so a
/// half-applied update is preferable to taking the request path down.
pub(crate) fn lock_recovering<'a, T>(lock: &'a Mutex<T>, owner: &'static str) -> MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        warn!(
            target = "tenderscope::cache",
            owner,
            result = "poisoned_recovered",
            "recovered from poisoned lock"
        );
        poisoned.into_inner()
    })
}
