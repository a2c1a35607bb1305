//! Peer matrix: vector clocks, index assignment, causal readiness
//!
//! For every peer the engine has heard of, the matrix keeps the vector
//! clock that peer most recently reported. Row 0 is the local peer; its
//! clock doubles as the local applied-counts vector (entry 0 counts the
//! messages the local peer has sent). The matrix also owns the per-origin
//! translation tables between compact wire indices and full peer ids.

use crate::crdt::ops::ClockUpdate;
use crate::types::PeerId;
use crate::{Error, Result};
use minicbor::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One entry of a reported vector clock
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct PeerVClockEntry {
    /// The peer this entry is about
    #[n(0)]
    pub peer: PeerId,

    /// Local index of `peer`
    #[n(1)]
    pub index: u64,

    /// Highest observed sequence number; never decreases
    #[n(2)]
    pub last_seq: u64,
}

/// One matrix row: a peer and the clock it last reported
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct PeerEntry {
    /// The row's peer
    #[n(0)]
    pub peer: PeerId,

    /// The peer's next logical timestamp, per its last report
    #[n(1)]
    pub next_ts: u64,

    /// Reported clock; entry 0 is the peer's view of itself
    #[n(2)]
    pub clock: Vec<PeerVClockEntry>,
}

/// Matrix of per-peer vector clocks plus index translation tables
#[derive(Clone, Debug)]
pub struct PeerMatrix {
    rows: Vec<PeerEntry>,
    index_of: HashMap<PeerId, u64>,
    /// origin -> (origin's wire index -> peer)
    remote: HashMap<PeerId, HashMap<u64, PeerId>>,
}

impl PeerMatrix {
    /// Create a matrix with the local peer at index 0
    pub fn new(local: PeerId) -> Self {
        let mut index_of = HashMap::new();
        index_of.insert(local, 0);

        Self {
            rows: vec![PeerEntry {
                peer: local,
                next_ts: 0,
                clock: vec![PeerVClockEntry {
                    peer: local,
                    index: 0,
                    last_seq: 0,
                }],
            }],
            index_of,
            remote: HashMap::new(),
        }
    }

    /// Rebuild a matrix from persisted rows plus replayed translation tables
    pub fn from_parts(rows: Vec<PeerEntry>, remote: HashMap<PeerId, HashMap<u64, PeerId>>) -> Result<Self> {
        if rows.is_empty() {
            return Err(Error::Serialization("empty peer table".to_string()));
        }
        // Row 0 must lead with the local peer's own entry.
        if rows[0].clock.first().map(|entry| entry.peer) != Some(rows[0].peer) {
            return Err(Error::Serialization("malformed local clock row".to_string()));
        }
        let mut index_of = HashMap::new();
        for (index, row) in rows.iter().enumerate() {
            if index_of.insert(row.peer, index as u64).is_some() {
                return Err(Error::IndexMismatch);
            }
        }
        Ok(Self {
            rows,
            index_of,
            remote,
        })
    }

    pub fn local(&self) -> PeerId {
        self.rows[0].peer
    }

    /// Number of known peers, the local peer included
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[PeerEntry] {
        &self.rows
    }

    pub fn peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.rows.iter().map(|row| row.peer)
    }

    /// Local index of `peer`, assigning the next dense index if unknown.
    /// A new peer starts with an empty reported clock. Rows are only ever
    /// created while applying material, never while decoding, so replaying
    /// the message log reproduces the same assignment order.
    pub fn peer_id_to_index(&mut self, peer: PeerId) -> u64 {
        if let Some(&index) = self.index_of.get(&peer) {
            return index;
        }
        let index = self.rows.len() as u64;
        self.rows.push(PeerEntry {
            peer,
            next_ts: 0,
            clock: Vec::new(),
        });
        self.index_of.insert(peer, index);
        index
    }

    pub fn index_to_peer_id(&self, index: u64) -> Option<PeerId> {
        self.rows.get(index as usize).map(|row| row.peer)
    }

    /// Resolve `origin`'s wire index through its declared mappings.
    /// Index 0 always denotes the sender itself.
    pub fn remote_index_to_peer_id(&self, origin: PeerId, index: u64) -> Result<PeerId> {
        if index == 0 {
            return Ok(origin);
        }
        self.remote
            .get(&origin)
            .and_then(|table| table.get(&index))
            .copied()
            .ok_or(Error::UnknownPeerIndex { index })
    }

    /// Register that `origin` uses `index` to denote `subject`. Without a
    /// subject the mapping must already exist. Mappings touch only the
    /// translation tables; they do not create matrix rows.
    pub fn peer_index_mapping(&mut self, origin: PeerId, subject: Option<PeerId>, index: u64) -> Result<PeerId> {
        if index == 0 {
            return match subject {
                None => Ok(origin),
                Some(declared) if declared == origin => Ok(origin),
                Some(_) => Err(Error::Codec("conflicting mapping for wire index 0".to_string())),
            };
        }
        let existing = self.remote.get(&origin).and_then(|table| table.get(&index)).copied();
        match (existing, subject) {
            (Some(peer), None) => Ok(peer),
            (Some(peer), Some(declared)) if peer == declared => Ok(peer),
            (Some(_), Some(_)) => Err(Error::Codec(format!(
                "conflicting mapping for wire index {index}"
            ))),
            (None, Some(declared)) => {
                self.remote.entry(origin).or_default().insert(index, declared);
                Ok(declared)
            }
            (None, None) => Err(Error::UnknownPeerIndex { index }),
        }
    }

    /// Validate a clock update from `origin` without mutating anything
    pub fn check_clock_update(&self, origin: PeerId, update: &ClockUpdate) -> Result<()> {
        if let Some(&index) = self.index_of.get(&origin) {
            let row = &self.rows[index as usize];
            if update.next_ts <= row.next_ts && row.next_ts > 0 {
                return Err(Error::ClockRegression { origin });
            }
            for entry in &update.entries {
                let previous = row
                    .clock
                    .iter()
                    .find(|existing| existing.peer == entry.peer)
                    .map(|existing| existing.last_seq)
                    .unwrap_or(0);
                if entry.last_seq < previous {
                    return Err(Error::ClockRegression { origin });
                }
            }
        }
        Ok(())
    }

    /// Merge a clock update into `origin`'s row
    pub fn apply_clock_update(&mut self, origin: PeerId, update: &ClockUpdate) -> Result<()> {
        self.check_clock_update(origin, update)?;

        // Ensure every referenced peer has a local row before the merge.
        let row_index = self.peer_id_to_index(origin) as usize;
        let local_indices: Vec<u64> = update
            .entries
            .iter()
            .map(|entry| self.peer_id_to_index(entry.peer))
            .collect();

        let row = &mut self.rows[row_index];
        row.next_ts = update.next_ts;
        for (entry, &local_index) in update.entries.iter().zip(&local_indices) {
            match row.clock.iter_mut().find(|existing| existing.peer == entry.peer) {
                Some(existing) => existing.last_seq = entry.last_seq,
                None => row.clock.push(PeerVClockEntry {
                    peer: entry.peer,
                    index: local_index,
                    last_seq: entry.last_seq,
                }),
            }
        }
        Ok(())
    }

    /// How many messages from `peer` the local peer has applied (or, for
    /// the local peer itself, sent)
    pub fn observed(&self, peer: &PeerId) -> u64 {
        self.rows[0]
            .clock
            .iter()
            .find(|entry| entry.peer == *peer)
            .map(|entry| entry.last_seq)
            .unwrap_or(0)
    }

    /// Record that message `seq` from `peer` has been applied locally
    pub fn record_applied(&mut self, peer: PeerId, seq: u64) {
        let index = self.peer_id_to_index(peer);
        let row = &mut self.rows[0];
        match row.clock.iter_mut().find(|entry| entry.peer == peer) {
            Some(entry) => entry.last_seq = entry.last_seq.max(seq),
            None => row.clock.push(PeerVClockEntry {
                peer,
                index,
                last_seq: seq,
            }),
        }
    }

    /// Record the sequence number of a locally encoded message
    pub fn record_sent(&mut self, seq: u64) {
        self.rows[0].clock[0].last_seq = seq;
    }

    pub fn local_last_sent(&self) -> u64 {
        self.rows[0].clock[0].last_seq
    }

    pub fn set_local_next_ts(&mut self, next_ts: u64) {
        self.rows[0].next_ts = next_ts;
    }

    /// Row 0 as a dense vector indexed by local peer index
    pub fn local_clock_snapshot(&self) -> Vec<u64> {
        let mut snapshot = vec![0u64; self.rows.len()];
        for entry in &self.rows[0].clock {
            if let Some(slot) = snapshot.get_mut(entry.index as usize) {
                *slot = entry.last_seq;
            }
        }
        snapshot
    }

    /// Dependencies of a clock update not yet satisfied locally: every
    /// `(peer, seq)` the sender reports that the local peer has not applied.
    pub fn missing_deps(&self, update: &ClockUpdate) -> Vec<(PeerId, u64)> {
        update
            .entries
            .iter()
            .filter(|entry| self.observed(&entry.peer) < entry.last_seq)
            .map(|entry| (entry.peer, entry.last_seq))
            .collect()
    }

    pub(crate) fn into_remote_tables(self) -> HashMap<PeerId, HashMap<u64, PeerId>> {
        self.remote
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::ops::ClockEntry;

    fn peer(n: u8) -> PeerId {
        PeerId([n; 32])
    }

    fn update(next_ts: u64, entries: Vec<(PeerId, u64)>) -> ClockUpdate {
        ClockUpdate {
            next_ts,
            entries: entries
                .into_iter()
                .map(|(peer, last_seq)| ClockEntry {
                    peer,
                    last_seq,
                    announce: false,
                })
                .collect(),
        }
    }

    #[test]
    fn indices_are_dense_and_stable() {
        let mut matrix = PeerMatrix::new(peer(0));
        assert_eq!(matrix.peer_id_to_index(peer(0)), 0);
        assert_eq!(matrix.peer_id_to_index(peer(1)), 1);
        assert_eq!(matrix.peer_id_to_index(peer(2)), 2);
        assert_eq!(matrix.peer_id_to_index(peer(1)), 1);
        assert_eq!(matrix.len(), 3);
    }

    #[test]
    fn wire_index_zero_is_the_sender() {
        let matrix = PeerMatrix::new(peer(0));
        assert_eq!(matrix.remote_index_to_peer_id(peer(1), 0).unwrap(), peer(1));
    }

    #[test]
    fn unknown_wire_index_is_fatal() {
        let matrix = PeerMatrix::new(peer(0));
        assert!(matches!(
            matrix.remote_index_to_peer_id(peer(1), 3),
            Err(Error::UnknownPeerIndex { index: 3 })
        ));
    }

    #[test]
    fn mapping_must_be_declared_before_use() {
        let mut matrix = PeerMatrix::new(peer(0));
        assert!(matrix.peer_index_mapping(peer(1), None, 2).is_err());

        matrix.peer_index_mapping(peer(1), Some(peer(2)), 2).unwrap();
        assert_eq!(matrix.peer_index_mapping(peer(1), None, 2).unwrap(), peer(2));
        assert_eq!(matrix.remote_index_to_peer_id(peer(1), 2).unwrap(), peer(2));

        // Translation is table-only; no matrix row was created.
        assert_eq!(matrix.len(), 1);
    }

    #[test]
    fn conflicting_mapping_is_rejected() {
        let mut matrix = PeerMatrix::new(peer(0));
        matrix.peer_index_mapping(peer(1), Some(peer(2)), 2).unwrap();
        assert!(matrix.peer_index_mapping(peer(1), Some(peer(3)), 2).is_err());
    }

    #[test]
    fn clock_update_merges_monotonically() {
        let mut matrix = PeerMatrix::new(peer(0));
        matrix
            .apply_clock_update(peer(1), &update(1, vec![(peer(1), 0), (peer(2), 3)]))
            .unwrap();
        matrix
            .apply_clock_update(peer(1), &update(5, vec![(peer(1), 1), (peer(2), 4)]))
            .unwrap();

        let row = &matrix.rows()[1];
        assert_eq!(row.next_ts, 5);
        assert_eq!(row.clock[0].last_seq, 1);
        assert_eq!(row.clock[1].last_seq, 4);
    }

    #[test]
    fn decreasing_seq_is_a_clock_regression() {
        let mut matrix = PeerMatrix::new(peer(0));
        matrix
            .apply_clock_update(peer(1), &update(1, vec![(peer(2), 3)]))
            .unwrap();
        let result = matrix.apply_clock_update(peer(1), &update(5, vec![(peer(2), 2)]));
        assert!(matches!(result, Err(Error::ClockRegression { .. })));
    }

    #[test]
    fn stale_next_ts_is_a_clock_regression() {
        let mut matrix = PeerMatrix::new(peer(0));
        matrix.apply_clock_update(peer(1), &update(4, vec![])).unwrap();
        let result = matrix.apply_clock_update(peer(1), &update(4, vec![]));
        assert!(matches!(result, Err(Error::ClockRegression { .. })));
    }

    #[test]
    fn missing_deps_reflect_applied_counts() {
        let mut matrix = PeerMatrix::new(peer(0));
        matrix.record_applied(peer(2), 1);

        let report = update(9, vec![(peer(1), 2), (peer(2), 1)]);
        assert_eq!(matrix.missing_deps(&report), vec![(peer(1), 2)]);
    }

    #[test]
    fn snapshot_is_indexed_by_local_index() {
        let mut matrix = PeerMatrix::new(peer(0));
        matrix.record_sent(2);
        matrix.record_applied(peer(1), 4);
        matrix.record_applied(peer(2), 1);

        assert_eq!(matrix.local_clock_snapshot(), vec![2, 4, 1]);
    }
}
