//! Per-resource table of in-flight requests.
//!
//! Each entry owns the sending half of a oneshot; removing the entry is
//! the only way to complete it, so a context completes at most once.
//! Entries carry a serial number so that releasing a stale slot never
//! touches a newer request that reused the same transaction id.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::{IsiError, Result};

/// Completion channel of one request.
pub(crate) type Completion = oneshot::Sender<Result<Bytes>>;

struct PendingEntry {
    owner: u64,
    serial: u64,
    tx: Completion,
}

/// In-flight requests of one resource, keyed by transaction id.
pub(crate) struct PendingTable {
    resource: u8,
    capacity: usize,
    entries: HashMap<u8, PendingEntry>,
    next_id: u8,
}

impl PendingTable {
    pub(crate) fn new(resource: u8, capacity: usize) -> Self {
        Self {
            resource,
            capacity: capacity.clamp(1, usize::from(u8::MAX)),
            entries: HashMap::new(),
            next_id: 1,
        }
    }

    /// Reserve a transaction id for `owner`.
    ///
    /// Ids run 1..=255 round-robin, skipping ids still in use.
    pub(crate) fn allocate(&mut self, owner: u64, serial: u64, tx: Completion) -> Result<u8> {
        if self.entries.len() >= self.capacity {
            return Err(IsiError::ResourceExhausted(self.resource));
        }

        let mut id = self.next_id;
        while self.entries.contains_key(&id) {
            id = next_transaction_id(id);
        }
        self.next_id = next_transaction_id(id);

        self.entries.insert(id, PendingEntry { owner, serial, tx });
        Ok(id)
    }

    /// Complete the request with `id`. Returns false when nothing was waiting.
    pub(crate) fn complete(&mut self, id: u8, result: Result<Bytes>) -> bool {
        match self.entries.remove(&id) {
            Some(entry) => {
                // The receiver may already be gone (dropped exchange racing a reply).
                let _ = entry.tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Drop the slot if it still belongs to the request with `serial`.
    pub(crate) fn release(&mut self, id: u8, serial: u64) {
        if self.entries.get(&id).is_some_and(|e| e.serial == serial) {
            self.entries.remove(&id);
        }
    }

    /// Fail every request of `owner`; returns how many were failed.
    pub(crate) fn fail_owned_by(&mut self, owner: u64, error: impl Fn() -> IsiError) -> usize {
        let ids: Vec<u8> = self
            .entries
            .iter()
            .filter(|(_, e)| e.owner == owner)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            self.complete(*id, Err(error()));
        }
        ids.len()
    }

    /// Fail every request on this resource; returns how many were failed.
    pub(crate) fn fail_all(&mut self, error: impl Fn() -> IsiError) -> usize {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            let _ = entry.tx.send(Err(error()));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn owned_by(&self, owner: u64) -> usize {
        self.entries.values().filter(|e| e.owner == owner).count()
    }
}

#[inline]
fn next_transaction_id(id: u8) -> u8 {
    if id == u8::MAX {
        1
    } else {
        id + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot() -> (Completion, oneshot::Receiver<Result<Bytes>>) {
        oneshot::channel()
    }

    #[test]
    fn test_allocate_sequential_ids() {
        let mut table = PendingTable::new(0x06, 8);
        let (a, _ra) = slot();
        let (b, _rb) = slot();

        assert_eq!(table.allocate(1, 1, a).unwrap(), 1);
        assert_eq!(table.allocate(1, 2, b).unwrap(), 2);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_capacity_exhausted() {
        let mut table = PendingTable::new(0x1B, 1);
        let (a, _ra) = slot();
        let (b, _rb) = slot();

        table.allocate(1, 1, a).unwrap();
        assert!(matches!(
            table.allocate(1, 2, b),
            Err(IsiError::ResourceExhausted(0x1B))
        ));
    }

    #[test]
    fn test_ids_wrap_and_skip_in_use() {
        let mut table = PendingTable::new(0x06, 255);
        let mut receivers = Vec::new();
        for serial in 0..255u64 {
            let (tx, rx) = slot();
            table.allocate(1, serial, tx).unwrap();
            receivers.push(rx);
        }

        // Free id 7 only; the next allocation must land on it.
        assert!(table.complete(7, Ok(Bytes::new())));
        let (tx, _rx) = slot();
        assert_eq!(table.allocate(1, 999, tx).unwrap(), 7);
    }

    #[test]
    fn test_complete_exactly_once() {
        let mut table = PendingTable::new(0x06, 8);
        let (tx, mut rx) = slot();
        let id = table.allocate(1, 1, tx).unwrap();

        assert!(table.complete(id, Ok(Bytes::from_static(&[0x01]))));
        assert!(!table.complete(id, Ok(Bytes::new())));

        let result = rx.try_recv().unwrap().unwrap();
        assert_eq!(&result[..], &[0x01]);
    }

    #[test]
    fn test_release_ignores_stale_serial() {
        let mut table = PendingTable::new(0x06, 8);
        let (tx, _rx) = slot();
        let id = table.allocate(1, 42, tx).unwrap();

        table.release(id, 41);
        assert_eq!(table.len(), 1);

        table.release(id, 42);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_fail_owned_by_leaves_others() {
        let mut table = PendingTable::new(0x06, 8);
        let (a, mut ra) = slot();
        let (b, mut rb) = slot();
        table.allocate(1, 1, a).unwrap();
        table.allocate(2, 2, b).unwrap();

        assert_eq!(table.fail_owned_by(1, || IsiError::ClientDestroyed), 1);
        assert!(matches!(ra.try_recv(), Ok(Err(IsiError::ClientDestroyed))));
        assert!(rb.try_recv().is_err());
        assert_eq!(table.owned_by(2), 1);
    }

    #[test]
    fn test_fail_all() {
        let mut table = PendingTable::new(0x06, 8);
        let (a, mut ra) = slot();
        let (b, mut rb) = slot();
        table.allocate(1, 1, a).unwrap();
        table.allocate(2, 2, b).unwrap();

        assert_eq!(table.fail_all(|| IsiError::ConnectionClosed), 2);
        assert!(matches!(ra.try_recv(), Ok(Err(IsiError::ConnectionClosed))));
        assert!(matches!(rb.try_recv(), Ok(Err(IsiError::ConnectionClosed))));
        assert_eq!(table.len(), 0);
    }
}
