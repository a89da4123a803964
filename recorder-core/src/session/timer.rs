use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::models::error::RecorderError;
use crate::pipeline::threads;

struct TimerSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Fixed-rate tick on a dedicated thread.
///
/// The first tick fires after `delay`, then every `period`. `stop` wakes the
/// thread immediately instead of waiting out the current period.
pub struct PeriodicTimer {
    name: &'static str,
    signal: Arc<TimerSignal>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTimer {
    pub fn start<F>(name: &'static str, delay: Duration, period: Duration, mut tick: F) -> Result<Self, RecorderError>
    where
        F: FnMut() + Send + 'static,
    {
        let signal = Arc::new(TimerSignal {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        });
        let thread_signal = Arc::clone(&signal);

        let handle = threads::spawn_named(name, move || {
            let mut next = Instant::now() + delay;
            loop {
                {
                    let mut stopped = thread_signal.stopped.lock();
                    while !*stopped && Instant::now() < next {
                        thread_signal.wake.wait_until(&mut stopped, next);
                    }
                    if *stopped {
                        break;
                    }
                }
                tick();
                next += period;
                // Skip ticks missed while the callback ran long.
                let now = Instant::now();
                if next < now {
                    next = now + period;
                }
            }
        })?;

        Ok(Self {
            name,
            signal,
            handle: Some(handle),
        })
    }

    fn signal_stop(&self) {
        *self.signal.stopped.lock() = true;
        self.signal.wake.notify_all();
    }

    /// Stop ticking and join the thread (bounded). Idempotent.
    pub fn stop(&mut self, join_timeout: Duration) {
        self.signal_stop();
        if let Some(handle) = self.handle.take() {
            threads::join_with_timeout(handle, join_timeout, self.name);
        }
    }
}

impl Drop for PeriodicTimer {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

struct ClockState {
    started: Instant,
    paused_total: Duration,
    paused_at: Option<Instant>,
}

/// Recorded time, excluding pauses.
#[derive(Clone)]
pub struct RecordingClock {
    state: Arc<Mutex<ClockState>>,
}

impl RecordingClock {
    pub fn start() -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                started: Instant::now(),
                paused_total: Duration::ZERO,
                paused_at: None,
            })),
        }
    }

    pub fn pause(&self) {
        let mut s = self.state.lock();
        if s.paused_at.is_none() {
            s.paused_at = Some(Instant::now());
        }
    }

    pub fn resume(&self) {
        let mut s = self.state.lock();
        if let Some(at) = s.paused_at.take() {
            s.paused_total += at.elapsed();
        }
    }

    pub fn active(&self) -> Duration {
        let s = self.state.lock();
        let now = s.paused_at.unwrap_or_else(Instant::now);
        now.duration_since(s.started).saturating_sub(s.paused_total)
    }

    pub fn active_secs(&self) -> u64 {
        self.active().as_secs()
    }
}
