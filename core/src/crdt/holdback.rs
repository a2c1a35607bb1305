//! Holdback buffers for messages that cannot be applied yet
//!
//! Two buffers cover the two ways a message can arrive early:
//! - [`HoldbackQueue`] holds decoded messages whose cross-peer causal
//!   dependencies are unsatisfied, indexed by the `(peer, seq)` pairs they
//!   wait for. When a dependency is applied, all blocked messages are
//!   re-checked.
//! - [`GapBuffer`] holds opened-but-undecoded payloads that arrived with a
//!   sequence gap; they cannot be decoded before the missing messages
//!   declare their peer-index mappings.
//!
//! Both buffers are bounded; overflow rejects new entries rather than
//! growing without limit.

use crate::crdt::ops::Message;
use crate::types::PeerId;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Identity of a message: its sender and sender sequence number
pub type MsgKey = (PeerId, u64);

/// A decoded message parked until its dependencies are applied
#[derive(Clone, Debug)]
pub struct PendingMessage {
    pub origin: PeerId,
    pub seq: u64,
    pub offset: i64,
    pub message: Message,
    /// Opened wire bytes, kept for the message log
    pub payload: Vec<u8>,
    missing: HashSet<MsgKey>,
}

impl PendingMessage {
    pub fn new(
        origin: PeerId,
        seq: u64,
        offset: i64,
        message: Message,
        payload: Vec<u8>,
        missing: Vec<MsgKey>,
    ) -> Self {
        Self {
            origin,
            seq,
            offset,
            message,
            payload,
            missing: missing.into_iter().collect(),
        }
    }

    fn key(&self) -> MsgKey {
        (self.origin, self.seq)
    }
}

/// Queue of causally-pending messages
#[derive(Debug)]
pub struct HoldbackQueue {
    /// Pending messages by identity
    pending: HashMap<MsgKey, PendingMessage>,

    /// Index: dependency -> messages waiting for it
    waiting_for: HashMap<MsgKey, HashSet<MsgKey>>,

    /// Capacity bound
    cap: usize,
}

impl HoldbackQueue {
    pub fn new(cap: usize) -> Self {
        Self {
            pending: HashMap::new(),
            waiting_for: HashMap::new(),
            cap,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Park a message with at least one missing dependency
    pub fn buffer(&mut self, pending: PendingMessage) -> Result<()> {
        if self.pending.len() >= self.cap {
            return Err(Error::HoldbackFull);
        }

        let key = pending.key();
        for dep in &pending.missing {
            self.waiting_for.entry(*dep).or_default().insert(key);
        }
        self.pending.insert(key, pending);
        Ok(())
    }

    /// Notify that a message has been applied.
    ///
    /// Returns every parked message whose dependencies are now all
    /// satisfied, removed from the queue.
    pub fn on_applied(&mut self, dep: MsgKey) -> Vec<PendingMessage> {
        let mut ready = Vec::new();

        if let Some(waiters) = self.waiting_for.remove(&dep) {
            for key in waiters {
                if let Some(pending) = self.pending.get_mut(&key) {
                    pending.missing.remove(&dep);
                    if pending.missing.is_empty() {
                        ready.push(key);
                    }
                }
            }
        }

        ready
            .into_iter()
            .filter_map(|key| self.pending.remove(&key))
            .collect()
    }
}

/// One sequence-gapped payload, opened but not yet decodable
#[derive(Clone, Debug)]
pub struct GapSlot {
    pub seq: u64,
    pub offset: i64,
    pub payload: Vec<u8>,
}

/// Per-sender buffer of sequence-gapped payloads
#[derive(Debug)]
pub struct GapBuffer {
    slots: HashMap<PeerId, BTreeMap<u64, GapSlot>>,
    total: usize,
    cap: usize,
}

impl GapBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            slots: HashMap::new(),
            total: 0,
            cap,
        }
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn senders(&self) -> Vec<PeerId> {
        self.slots.keys().copied().collect()
    }

    /// Store a gapped payload; a redelivery of the same sequence number
    /// keeps the first copy.
    pub fn insert(&mut self, sender: PeerId, slot: GapSlot) -> Result<()> {
        if self.total >= self.cap {
            return Err(Error::HoldbackFull);
        }
        let entry = self.slots.entry(sender).or_default();
        if entry.contains_key(&slot.seq) {
            return Ok(());
        }
        entry.insert(slot.seq, slot);
        self.total += 1;
        Ok(())
    }

    /// Pop the buffered payload for `sender` if it is exactly `expected`.
    /// Slots the sender has already advanced past are discarded.
    pub fn take_next(&mut self, sender: &PeerId, expected: u64) -> Option<GapSlot> {
        let entry = self.slots.get_mut(sender)?;
        while let Some(&first) = entry.keys().next() {
            if first < expected {
                entry.remove(&first);
                self.total -= 1;
            } else {
                break;
            }
        }

        let slot = match entry.keys().next().copied() {
            Some(first) if first == expected => {
                self.total -= 1;
                entry.remove(&first)
            }
            _ => None,
        };
        if entry.is_empty() {
            self.slots.remove(sender);
        }
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::ops::{Message, Op};
    use crate::types::ItemId;

    fn peer(n: u8) -> PeerId {
        PeerId([n; 32])
    }

    fn message(origin: PeerId, seq: u64) -> Message {
        Message {
            origin,
            seq,
            schema_id: ItemId::new(1, origin),
            timestamp: 0,
            ops: Vec::<Op>::new(),
        }
    }

    fn pending(origin: PeerId, seq: u64, missing: Vec<MsgKey>) -> PendingMessage {
        PendingMessage::new(origin, seq, -1, message(origin, seq), Vec::new(), missing)
    }

    #[test]
    fn buffer_and_release_on_dependency() {
        let mut queue = HoldbackQueue::new(16);
        queue.buffer(pending(peer(2), 1, vec![(peer(1), 2)])).unwrap();
        assert_eq!(queue.len(), 1);

        let ready = queue.on_applied((peer(1), 2));
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].origin, peer(2));
        assert!(queue.is_empty());
    }

    #[test]
    fn all_dependencies_must_be_satisfied() {
        let mut queue = HoldbackQueue::new(16);
        queue
            .buffer(pending(peer(3), 1, vec![(peer(1), 1), (peer(2), 1)]))
            .unwrap();

        assert!(queue.on_applied((peer(1), 1)).is_empty());
        assert_eq!(queue.len(), 1);

        let ready = queue.on_applied((peer(2), 1));
        assert_eq!(ready.len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn unrelated_dependency_releases_nothing() {
        let mut queue = HoldbackQueue::new(16);
        queue.buffer(pending(peer(2), 1, vec![(peer(1), 2)])).unwrap();
        assert!(queue.on_applied((peer(1), 1)).is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn queue_full_rejects() {
        let mut queue = HoldbackQueue::new(2);
        queue.buffer(pending(peer(2), 1, vec![(peer(1), 1)])).unwrap();
        queue.buffer(pending(peer(2), 2, vec![(peer(1), 1)])).unwrap();
        let result = queue.buffer(pending(peer(2), 3, vec![(peer(1), 1)]));
        assert!(matches!(result, Err(Error::HoldbackFull)));
    }

    #[test]
    fn gap_buffer_releases_in_sequence() {
        let mut gaps = GapBuffer::new(16);
        gaps.insert(
            peer(1),
            GapSlot {
                seq: 3,
                offset: 7,
                payload: vec![3],
            },
        )
        .unwrap();
        gaps.insert(
            peer(1),
            GapSlot {
                seq: 2,
                offset: 6,
                payload: vec![2],
            },
        )
        .unwrap();

        assert!(gaps.take_next(&peer(1), 1).is_none());
        let slot = gaps.take_next(&peer(1), 2).unwrap();
        assert_eq!(slot.payload, vec![2]);
        let slot = gaps.take_next(&peer(1), 3).unwrap();
        assert_eq!(slot.payload, vec![3]);
        assert!(gaps.is_empty());
    }

    #[test]
    fn gap_buffer_keeps_first_copy() {
        let mut gaps = GapBuffer::new(16);
        gaps.insert(
            peer(1),
            GapSlot {
                seq: 2,
                offset: 6,
                payload: vec![1],
            },
        )
        .unwrap();
        gaps.insert(
            peer(1),
            GapSlot {
                seq: 2,
                offset: 9,
                payload: vec![9],
            },
        )
        .unwrap();

        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps.take_next(&peer(1), 2).unwrap().payload, vec![1]);
    }
}
