use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::models::error::RecorderError;

const JOIN_POLL: Duration = Duration::from_millis(5);

/// Spawn a named worker thread.
pub(crate) fn spawn_named<F>(name: &str, f: F) -> Result<JoinHandle<()>, RecorderError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.into())
        .spawn(f)
        .map_err(|e| RecorderError::Io(format!("failed to spawn {} thread: {}", name, e)))
}

/// Join `handle`, waiting at most `timeout`.
///
/// Returns false when the thread is still running at the deadline. The
/// handle is dropped and the thread left detached; media threads are never
/// killed.
pub(crate) fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration, name: &str) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            log::warn!("Thread '{}' still running after {:?}, leaking it", name, timeout);
            return false;
        }
        thread::sleep(JOIN_POLL);
    }
    if handle.join().is_err() {
        log::error!("Thread '{}' panicked", name);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn finished_thread_joins() {
        let handle = spawn_named("quick", || {}).unwrap();
        assert!(join_with_timeout(handle, Duration::from_secs(1), "quick"));
    }

    #[test]
    fn stuck_thread_is_leaked() {
        let release = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&release);
        let handle = spawn_named("stuck", move || {
            while !flag.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
        })
        .unwrap();

        assert!(!join_with_timeout(handle, Duration::from_millis(30), "stuck"));
        release.store(true, Ordering::SeqCst);
    }
}
