use std::sync::{Mutex, MutexGuard};

/// Lock shared audio state, recovering the data if an audio callback panicked
/// while holding the lock. Playback keeps going with whatever state was left.
pub(crate) fn lock_or_recover<'a, T>(lock: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        crate::log_debug(&format!("{context}: lock poisoned by a panicked holder; recovering"));
        tracing::warn!(target: "voxstream::audio", context, "recovered poisoned lock");
        lock.clear_poison();
        poisoned.into_inner()
    })
}
