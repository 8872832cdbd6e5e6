//! Outbox queue of operations awaiting remote confirmation.

use std::vec;

use stepsync_common::OutboxItem;

/// Ordered queue of pending operations, oldest first.
///
/// The outbox itself is in-memory; durability comes from the engine, which
/// persists it together with the local state on every change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outbox {
    items: Vec<OutboxItem>,
}

/// One-shot pass over the items present when [`Outbox::drain`] was called.
///
/// Draining never removes anything: items leave the queue only through
/// [`Outbox::remove`] or [`Outbox::retain_all`], so an abandoned pass loses
/// nothing and a fresh `drain` starts again from the oldest item.
#[derive(Debug)]
pub struct Drain {
    inner: vec::IntoIter<OutboxItem>,
}

impl Iterator for Drain {
    type Item = OutboxItem;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Drain {}

impl Outbox {
    /// Create an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild an outbox from persisted items, keeping their order.
    pub fn from_items(items: Vec<OutboxItem>) -> Self {
        Self { items }
    }

    /// Append an item at the back of the queue.
    pub fn enqueue(&mut self, item: OutboxItem) {
        self.items.push(item);
    }

    /// Snapshot the current items for one pass.
    pub fn drain(&self) -> Drain {
        Drain {
            inner: self.items.clone().into_iter(),
        }
    }

    /// Remove a confirmed item by ID.
    pub fn remove(&mut self, id: &str) -> Option<OutboxItem> {
        let index = self.items.iter().position(|item| item.id() == id)?;
        Some(self.items.remove(index))
    }

    /// Keep only the items matching `keep`, preserving order.
    ///
    /// The retained sequence is built aside and swapped in whole, so nobody
    /// observes a half-filtered queue.
    pub fn retain_all<F>(&mut self, mut keep: F)
    where
        F: FnMut(&OutboxItem) -> bool,
    {
        let retained: Vec<OutboxItem> = self.items.iter().filter(|item| keep(item)).cloned().collect();
        self.items = retained;
    }

    /// Check whether an item with this ID is still queued.
    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|item| item.id() == id)
    }

    /// Iterate over queued items, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &OutboxItem> {
        self.items.iter()
    }

    /// Get count of queued items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the outbox is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Copy the items out for persistence.
    pub fn to_vec(&self) -> Vec<OutboxItem> {
        self.items.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepsync_common::{Operation, StepsPayload, WalletPayload, WithdrawPayload};

    fn steps(delta: u64) -> OutboxItem {
        OutboxItem::new(Operation::CounterIncrement(StepsPayload {
            delta,
            counter_snapshot: delta,
            balance_snapshot: delta,
            wallet_snapshot: None,
        }))
    }

    fn withdraw(amount: u64) -> OutboxItem {
        OutboxItem::new(Operation::WithdrawalRequest(WithdrawPayload {
            destination: "addr".to_string(),
            amount,
            wallet_snapshot: None,
        }))
    }

    #[test]
    fn test_outbox_creation() {
        let outbox = Outbox::new();
        assert!(outbox.is_empty());
        assert_eq!(outbox.drain().count(), 0);
    }

    #[test]
    fn test_enqueue_keeps_fifo_order() {
        let mut outbox = Outbox::new();
        let a = steps(1);
        let b = withdraw(5);
        let c = OutboxItem::new(Operation::WalletAssignment(WalletPayload::default()));
        outbox.enqueue(a.clone());
        outbox.enqueue(b.clone());
        outbox.enqueue(c.clone());

        let ids: Vec<String> = outbox.drain().map(|i| i.id().to_string()).collect();
        assert_eq!(ids, vec![a.id(), b.id(), c.id()]);
    }

    #[test]
    fn test_drain_is_a_snapshot() {
        let mut outbox = Outbox::new();
        outbox.enqueue(steps(1));

        let drain = outbox.drain();
        outbox.enqueue(steps(2));

        assert_eq!(drain.len(), 1);
        assert_eq!(outbox.len(), 2);
    }

    #[test]
    fn test_abandoned_drain_restarts_from_start() {
        let mut outbox = Outbox::new();
        let first = steps(1);
        outbox.enqueue(first.clone());
        outbox.enqueue(steps(2));

        let mut drain = outbox.drain();
        assert_eq!(drain.next().unwrap().id(), first.id());
        drop(drain);

        let mut again = outbox.drain();
        assert_eq!(again.next().unwrap().id(), first.id());
        assert_eq!(outbox.len(), 2);
    }

    #[test]
    fn test_remove() {
        let mut outbox = Outbox::new();
        let a = steps(1);
        let b = steps(2);
        outbox.enqueue(a.clone());
        outbox.enqueue(b.clone());

        assert_eq!(outbox.remove(a.id()), Some(a.clone()));
        assert!(outbox.remove(a.id()).is_none());
        assert!(!outbox.contains(a.id()));
        assert!(outbox.contains(b.id()));
    }

    #[test]
    fn test_retain_all_preserves_order() {
        let mut outbox = Outbox::new();
        let items: Vec<OutboxItem> = (1..=5).map(steps).collect();
        for item in &items {
            outbox.enqueue(item.clone());
        }

        let drop_ids = [items[1].id().to_string(), items[3].id().to_string()];
        outbox.retain_all(|item| !drop_ids.iter().any(|id| id == item.id()));

        let remaining: Vec<&str> = outbox.iter().map(|i| i.id()).collect();
        assert_eq!(remaining, vec![items[0].id(), items[2].id(), items[4].id()]);
    }

    #[test]
    fn test_from_items_round_trip() {
        let items = vec![steps(1), withdraw(3)];
        let outbox = Outbox::from_items(items.clone());
        assert_eq!(outbox.to_vec(), items);
    }
}
