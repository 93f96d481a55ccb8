//! Patch feed for observing mutations.
//!
//! The feed distributes emitted patches to subscribers. Models feed
//! their own subscribers directly; collections re-broadcast member
//! patches with rebased paths, so a single collection subscription
//! observes every mutation in the graph.

use crate::patch::Patch;
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// A multi-subscriber fan-out of emitted patches.
///
/// Subscribers receive patches over an unbounded channel and should be
/// drained regularly. Disconnected subscribers are dropped on the next
/// emit.
#[derive(Default)]
pub(crate) struct PatchFeed {
    subscribers: RwLock<Vec<Sender<Patch>>>,
}

impl PatchFeed {
    /// Creates a new feed with no subscribers.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Subscribes to the feed.
    ///
    /// Returns a receiver that will observe all future patches.
    pub(crate) fn subscribe(&self) -> Receiver<Patch> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits a patch to all subscribers.
    pub(crate) fn emit(&self, patch: Patch) {
        let mut subscribers = self.subscribers.write();
        match subscribers.len() {
            0 => {}
            1 => {
                if subscribers[0].send(patch).is_err() {
                    subscribers.clear();
                }
            }
            _ => subscribers.retain(|tx| tx.send(patch.clone()).is_ok()),
        }
    }

    /// Emits buffered patches from a completed batch, in order.
    pub(crate) fn emit_batch(&self, patches: Vec<Patch>) {
        for patch in patches {
            self.emit(patch);
        }
    }

    /// Returns the number of live subscribers.
    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refstore_codec::Value;

    #[test]
    fn emit_and_receive() {
        let feed = PatchFeed::new();
        let rx = feed.subscribe();

        let patch = Patch::add("/name", Value::from("a"));
        feed.emit(patch.clone());

        assert_eq!(rx.try_recv().unwrap(), patch);
    }

    #[test]
    fn multiple_subscribers() {
        let feed = PatchFeed::new();
        let rx1 = feed.subscribe();
        let rx2 = feed.subscribe();

        let patch = Patch::add("/name", Value::from("a"));
        feed.emit(patch.clone());

        assert_eq!(rx1.try_recv().unwrap(), patch);
        assert_eq!(rx2.try_recv().unwrap(), patch);
    }

    #[test]
    fn subscriber_cleanup() {
        let feed = PatchFeed::new();
        assert_eq!(feed.subscriber_count(), 0);

        let rx = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 1);

        drop(rx);

        feed.emit(Patch::add("/x", Value::Null));
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[test]
    fn batch_preserves_order() {
        let feed = PatchFeed::new();
        let rx = feed.subscribe();

        feed.emit_batch(vec![
            Patch::add("/a", Value::Integer(1)),
            Patch::add("/b", Value::Integer(2)),
        ]);

        assert_eq!(rx.try_recv().unwrap().path, "/a");
        assert_eq!(rx.try_recv().unwrap().path, "/b");
    }
}
