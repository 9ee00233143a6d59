/// Store notifications, fanned out to every subscriber over crossbeam
/// channels.
///
/// The view drains its receiver on its own schedule instead of being called
/// back inline. Events carry references, never record copies, so the
/// consumer re-resolves current data when it handles the event.
use super::store::RecordRef;
use super::RecordKind;
use compact_str::CompactString;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

/// Which field group an update touched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Size, mtime, details, description, flags read from the database.
    Info,
    Thumbnail,
    /// A user flag toggle (favourite, archived, active).
    Flags,
    /// A user edit of the description.
    Description,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreEvent {
    /// Both buckets of `folder` are being rebuilt; treat them as empty.
    ResetBegin { folder: CompactString },
    /// The rebuilt buckets of `folder` are live.
    ResetEnd { folder: CompactString },
    /// Fields of one record changed. Resolve the ref to get its current id.
    RecordUpdated { record: RecordRef, change: ChangeKind },
    /// Every id of the bucket may have changed.
    Reindexed {
        folder: CompactString,
        kind: RecordKind,
    },
}

/// Broadcast topic with one unbounded channel per subscriber.
///
/// Unbounded because the main thread both publishes reset events and drains
/// its own receiver; a bounded channel could block it against itself.
#[derive(Default)]
pub struct EventHub {
    subscribers: Mutex<Vec<Sender<StoreEvent>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<StoreEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber, pruning dropped ones.
    pub fn publish(&self, event: StoreEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_reaches_every_subscriber() {
        let hub = EventHub::new();
        let a = hub.subscribe();
        let b = hub.subscribe();
        hub.publish(StoreEvent::ResetBegin {
            folder: CompactString::new("scenes"),
        });
        assert!(matches!(a.try_recv(), Ok(StoreEvent::ResetBegin { .. })));
        assert!(matches!(b.try_recv(), Ok(StoreEvent::ResetBegin { .. })));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let hub = EventHub::new();
        let kept = hub.subscribe();
        drop(hub.subscribe());
        hub.publish(StoreEvent::ResetEnd {
            folder: CompactString::new("."),
        });
        assert_eq!(hub.subscriber_count(), 1);
        assert!(kept.try_recv().is_ok());
    }
}
