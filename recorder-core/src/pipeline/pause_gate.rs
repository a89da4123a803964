use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct GateState {
    /// The capture thread is between acquiring the gate and finishing a frame.
    reading: bool,
    /// `pause` holds the permit.
    paused: bool,
    /// `pause` is waiting; readers must not re-enter.
    pause_pending: bool,
    closed: bool,
}

/// Single-permit gate between the capture thread and `pause()`.
///
/// The capture thread holds the permit for the duration of one frame read
/// and sink write. `pause` raises a pending flag so a reader looping
/// tightly cannot re-acquire ahead of it, then holds the permit until
/// `resume`. `close` wakes everybody and refuses further entries.
pub struct PauseGate {
    state: Mutex<GateState>,
    cond: Condvar,
}

/// Proof that the reader holds the permit. Released on drop.
pub struct ReadPermit<'a> {
    gate: &'a PauseGate,
}

impl Drop for ReadPermit<'_> {
    fn drop(&mut self) {
        let mut s = self.gate.state.lock();
        s.reading = false;
        drop(s);
        self.gate.cond.notify_all();
    }
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            cond: Condvar::new(),
        }
    }

    /// Block while paused. Returns `None` once the gate is closed.
    pub fn enter(&self) -> Option<ReadPermit<'_>> {
        let mut s = self.state.lock();
        while (s.paused || s.pause_pending || s.reading) && !s.closed {
            self.cond.wait(&mut s);
        }
        if s.closed {
            return None;
        }
        s.reading = true;
        Some(ReadPermit { gate: self })
    }

    /// Wait for the in-flight frame to finish, then hold the permit.
    /// Returns false if already paused or closed.
    pub fn pause(&self) -> bool {
        let mut s = self.state.lock();
        if s.paused || s.pause_pending || s.closed {
            return false;
        }
        s.pause_pending = true;
        while s.reading && !s.closed {
            self.cond.wait(&mut s);
        }
        s.pause_pending = false;
        if s.closed {
            self.cond.notify_all();
            return false;
        }
        s.paused = true;
        true
    }

    /// Release the permit taken by `pause`. Returns false if not paused.
    pub fn resume(&self) -> bool {
        let mut s = self.state.lock();
        if !s.paused {
            return false;
        }
        s.paused = false;
        drop(s);
        self.cond.notify_all();
        true
    }

    /// Refuse all further entries and wake any waiter.
    pub fn close(&self) {
        let mut s = self.state.lock();
        s.closed = true;
        s.paused = false;
        drop(s);
        self.cond.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }
}
