use std::sync::{Mutex, OnceLock};

use sampledex::config::WORKER_COUNT_ENV;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

/// Holds the worker-count environment variable at a fixed value until dropped.
pub struct WorkerEnvGuard {
    previous: Option<String>,
    _lock: std::sync::MutexGuard<'static, ()>,
}

impl WorkerEnvGuard {
    pub fn set(value: &str) -> Self {
        let lock = ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        let previous = std::env::var(WORKER_COUNT_ENV).ok();
        // SAFETY: tests run under a global lock to prevent concurrent env mutations.
        unsafe {
            std::env::set_var(WORKER_COUNT_ENV, value);
        }
        Self {
            previous,
            _lock: lock,
        }
    }
}

impl Drop for WorkerEnvGuard {
    fn drop(&mut self) {
        // SAFETY: tests run under a global lock to prevent concurrent env mutations.
        unsafe {
            match self.previous.take() {
                Some(value) => std::env::set_var(WORKER_COUNT_ENV, value),
                None => std::env::remove_var(WORKER_COUNT_ENV),
            }
        }
    }
}
