use std::sync::{Mutex, MutexGuard, OnceLock};

/// Serialises tests that change process-wide state: the working directory or fd 0.
pub(crate) fn lock_process_state() -> MutexGuard<'static, ()> {
    static MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
    MUTEX
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
