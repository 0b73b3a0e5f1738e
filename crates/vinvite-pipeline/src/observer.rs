//! Status observers.
//!
//! Callbacks run synchronously, in registration order, on the thread that
//! made the transition. The list is snapshotted before each notification and
//! each entry is re-checked right before its call, so a callback removed
//! mid-notification (by itself or by another callback) is skipped.
//!
//! Callbacks must not start or cancel the pipeline they observe; hand the
//! snapshot to a channel instead.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use vinvite_models::PipelineStatus;

type Callback = Arc<dyn Fn(&PipelineStatus) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Observers {
    callbacks: Mutex<Vec<(u64, Callback)>>,
    next_id: AtomicU64,
    /// Sequence number of the last delivered snapshot
    delivered: Mutex<u64>,
}

impl Observers {
    pub(crate) fn subscribe(self: &Arc<Self>, callback: Callback) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut callbacks) = self.callbacks.lock() {
            callbacks.push((id, callback));
        }
        Subscription {
            id,
            observers: Arc::downgrade(self),
        }
    }

    fn unsubscribe(&self, id: u64) -> bool {
        match self.callbacks.lock() {
            Ok(mut callbacks) => {
                let before = callbacks.len();
                callbacks.retain(|(existing, _)| *existing != id);
                callbacks.len() != before
            }
            Err(_) => false,
        }
    }

    fn is_subscribed(&self, id: u64) -> bool {
        self.callbacks
            .lock()
            .map(|callbacks| callbacks.iter().any(|(existing, _)| *existing == id))
            .unwrap_or(false)
    }

    pub(crate) fn len(&self) -> usize {
        self.callbacks.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Deliver `status`, tagged with sequence number `seq`.
    ///
    /// Snapshots older than one already delivered are dropped, so observers
    /// never see state go backwards when transitions race across threads.
    pub(crate) fn notify(&self, seq: u64, status: &PipelineStatus) {
        let Ok(mut delivered) = self.delivered.lock() else {
            return;
        };
        if seq <= *delivered {
            return;
        }
        *delivered = seq;

        let snapshot: Vec<(u64, Callback)> = match self.callbacks.lock() {
            Ok(callbacks) => callbacks.clone(),
            Err(_) => return,
        };
        for (id, callback) in snapshot {
            if self.is_subscribed(id) {
                callback(status);
            }
        }
    }
}

/// Handle returned by `subscribe`. Dropping it unsubscribes.
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    observers: Weak<Observers>,
}

impl Subscription {
    /// Stop receiving notifications. Safe to call from inside a callback.
    pub fn unsubscribe(&self) {
        if let Some(observers) = self.observers.upgrade() {
            observers.unsubscribe(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vinvite_models::PipelineState;

    fn status(progress: u8) -> PipelineStatus {
        PipelineStatus {
            state: PipelineState::Generating,
            progress,
            ..Default::default()
        }
    }

    #[test]
    fn test_registration_order() {
        let observers = Arc::new(Observers::default());
        let log = Arc::new(Mutex::new(Vec::new()));

        let a = log.clone();
        let _first = observers.subscribe(Arc::new(move |_| a.lock().unwrap().push("first")));
        let b = log.clone();
        let _second = observers.subscribe(Arc::new(move |_| b.lock().unwrap().push("second")));

        observers.notify(1, &status(10));
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_unsubscribe_during_notification() {
        let observers = Arc::new(Observers::default());
        let calls = Arc::new(AtomicU64::new(0));
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let counter = calls.clone();
        let own = slot.clone();
        let subscription = observers.subscribe(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = own.lock().unwrap().as_ref() {
                sub.unsubscribe();
            }
        }));
        *slot.lock().unwrap() = Some(subscription);

        observers.notify(1, &status(10));
        observers.notify(2, &status(20));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(observers.len(), 0);
    }

    #[test]
    fn test_callback_removed_by_earlier_callback_is_skipped() {
        let observers = Arc::new(Observers::default());
        let second_calls = Arc::new(AtomicU64::new(0));
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let target = victim.clone();
        let _first = observers.subscribe(Arc::new(move |_| {
            target.lock().unwrap().take();
        }));
        let counter = second_calls.clone();
        *victim.lock().unwrap() = Some(observers.subscribe(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        observers.notify(1, &status(10));
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let observers = Arc::new(Observers::default());
        let subscription = observers.subscribe(Arc::new(|_| {}));
        assert_eq!(observers.len(), 1);
        drop(subscription);
        assert_eq!(observers.len(), 0);
    }

    #[test]
    fn test_stale_snapshot_dropped() {
        let observers = Arc::new(Observers::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = observers.subscribe(Arc::new(move |s: &PipelineStatus| {
            sink.lock().unwrap().push(s.progress)
        }));

        observers.notify(2, &status(40));
        observers.notify(1, &status(20));
        observers.notify(3, &status(60));
        assert_eq!(*seen.lock().unwrap(), vec![40, 60]);
    }
}
