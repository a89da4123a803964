use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::recording_result::RecordingResult;
use crate::models::state::SessionStatus;
use crate::traits::observer::RecorderObserver;

/// Returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Subscribed observers. Callbacks run on a snapshot, outside the lock, so
/// an observer may subscribe or unsubscribe from inside a callback.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Mutex<Vec<(SubscriptionId, Arc<dyn RecorderObserver>)>>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn RecorderObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.lock().push((id, observer));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(sid, _)| *sid != id);
        observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn RecorderObserver>> {
        self.observers.lock().iter().map(|(_, o)| Arc::clone(o)).collect()
    }

    pub fn status_changed(&self, status: &SessionStatus) {
        for observer in self.snapshot() {
            observer.on_status_changed(status);
        }
    }

    pub fn elapsed_time(&self, seconds: u64) {
        for observer in self.snapshot() {
            observer.on_elapsed_time(seconds);
        }
    }

    pub fn amplitude(&self, level: u32) {
        for observer in self.snapshot() {
            observer.on_amplitude(level);
        }
    }

    pub fn recording_finished(&self, result: &RecordingResult) {
        for observer in self.snapshot() {
            observer.on_recording_finished(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::memory::CollectingObserver;

    #[test]
    fn unsubscribed_observer_stops_receiving() {
        let registry = ObserverRegistry::new();
        let first = Arc::new(CollectingObserver::new());
        let second = Arc::new(CollectingObserver::new());
        let id = registry.subscribe(first.clone());
        registry.subscribe(second.clone());

        registry.amplitude(120);
        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        registry.amplitude(240);
        registry.status_changed(&SessionStatus::Recording);

        assert_eq!(first.amplitudes(), vec![120]);
        assert_eq!(second.amplitudes(), vec![120, 240]);
        assert_eq!(second.statuses(), vec![SessionStatus::Recording]);
        assert_eq!(registry.len(), 1);
    }
}
