//! Cloud lifecycle events.

use heapless::Deque;

/// Depth of the queue drained with [`crate::CloudClient::next_event`].
pub const EVENT_QUEUE_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CloudEvent {
    /// Attached to a thing and subscribed to its topics.
    Connect,
    /// The thing session ended (connection loss, thing change, or retry exhaustion).
    Disconnect,
    /// The last-values reply was applied.
    Sync,
}

impl CloudEvent {
    fn slot(self) -> usize {
        match self {
            Self::Connect => 0,
            Self::Disconnect => 1,
            Self::Sync => 2,
        }
    }
}

/// Callback table plus a bounded queue; the oldest event is dropped on overflow.
#[derive(Debug, Default)]
pub(crate) struct EventDispatcher {
    callbacks: [Option<fn()>; 3],
    queue: Deque<CloudEvent, EVENT_QUEUE_DEPTH>,
}

impl EventDispatcher {
    pub(crate) fn set_callback(&mut self, event: CloudEvent, callback: fn()) {
        self.callbacks[event.slot()] = Some(callback);
    }

    pub(crate) fn emit(&mut self, event: CloudEvent) {
        debug!("cloud event {:?}", event);
        if let Some(callback) = self.callbacks[event.slot()] {
            callback();
        }
        if self.queue.is_full() {
            self.queue.pop_front();
        }
        let _ = self.queue.push_back(event);
    }

    pub(crate) fn next(&mut self) -> Option<CloudEvent> {
        self.queue.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_keeps_newest_events() {
        let mut events = EventDispatcher::default();
        for _ in 0..EVENT_QUEUE_DEPTH {
            events.emit(CloudEvent::Connect);
        }
        events.emit(CloudEvent::Sync);
        let drained: std::vec::Vec<_> = core::iter::from_fn(|| events.next()).collect();
        assert_eq!(drained.len(), EVENT_QUEUE_DEPTH);
        assert_eq!(drained.last(), Some(&CloudEvent::Sync));
    }

    #[test]
    fn callbacks_fire_per_event() {
        use core::sync::atomic::{AtomicU32, Ordering};
        static SYNCS: AtomicU32 = AtomicU32::new(0);
        fn on_sync() {
            SYNCS.fetch_add(1, Ordering::Relaxed);
        }

        let mut events = EventDispatcher::default();
        events.set_callback(CloudEvent::Sync, on_sync);
        events.emit(CloudEvent::Connect);
        events.emit(CloudEvent::Sync);
        assert_eq!(SYNCS.load(Ordering::Relaxed), 1);
    }
}
