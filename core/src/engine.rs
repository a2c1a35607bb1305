//! Peer engine: local edit capture, message framing, causal delivery
//!
//! The engine exclusively owns the peer matrix, the CRDTs, the outgoing
//! buffer, and the message log. It is logically single-threaded: every
//! externally observable transition (local edit, encode, receive) is one
//! atomic step.
//!
//! Receive pipeline:
//! 1. Own messages echoed back by the relay acknowledge a log entry.
//! 2. Payloads are opened at the seal boundary.
//! 3. Sequence-gapped payloads park undecoded in the gap buffer and the
//!    gap is reported so the transport can resubscribe.
//! 4. Contiguous payloads decode (registering peer-index mappings), then
//!    apply or park in the causal holdback queue.
//! 5. Every application drains newly ready messages until quiescent.

use crate::crdt::holdback::{GapBuffer, GapSlot, HoldbackQueue, MsgKey, PendingMessage};
use crate::crdt::matrix::{PeerEntry, PeerMatrix};
use crate::crdt::ops::{ClockEntry, ClockUpdate, Message, Op, SchemaDecl};
use crate::crypto::{seal, SealKey};
use crate::document::TextDocument;
use crate::state::{self, DocumentState, MessageLogEntry, PeerState};
use crate::types::{ChannelId, ItemId, PeerId};
use crate::wire::Codec;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Engine limits
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Maximum decoded messages awaiting causal dependencies
    pub max_pending: usize,

    /// Maximum sequence-gapped payloads held for reordering
    pub max_gapped: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_pending: 10_000,
            max_gapped: 1_000,
        }
    }
}

/// Outcome of [`Engine::receive_message`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Receipt {
    /// Applied now, possibly flushing previously buffered messages
    Applied,

    /// Decoded but parked until its causal dependencies arrive
    Buffered,

    /// Already seen; ignored
    Duplicate,

    /// Own message echoed back; its log offset is now recorded
    Acked,
}

/// A collaborative-editing peer bound to one channel
pub struct Engine {
    me: PeerId,
    channel: ChannelId,
    secret: Option<SealKey>,

    /// Last logical timestamp consumed locally
    clock: u64,

    matrix: PeerMatrix,
    doc: TextDocument,

    /// Locally generated operations not yet framed into a message
    outgoing: Vec<Op>,

    /// Sent and applied messages, in apply order
    log: Vec<MessageLogEntry>,

    holdback: HoldbackQueue,
    gaps: GapBuffer,

    /// Highest contiguous sequence number received per sender
    last_seen: HashMap<PeerId, u64>,

    /// Messages applied since the last drain pass
    applied_events: VecDeque<MsgKey>,

    channel_offset: i64,

    /// Row-0 snapshot as of the last encoded message, for clock deltas
    reported: Vec<u64>,

    /// Local indices already introduced to receivers with their peer id
    announced: HashSet<u64>,

    schemas: BTreeMap<ItemId, SchemaDecl>,
    default_schema: Option<ItemId>,
    cursors_item: Option<ItemId>,
    characters_item: Option<ItemId>,
}

impl Engine {
    /// Create a fresh peer on a channel
    pub fn new_peer(me: PeerId, channel: ChannelId) -> Self {
        Self::with_config(me, channel, EngineConfig::default())
    }

    pub fn with_config(me: PeerId, channel: ChannelId, config: EngineConfig) -> Self {
        Self {
            me,
            channel,
            secret: None,
            clock: 0,
            matrix: PeerMatrix::new(me),
            doc: TextDocument::new(),
            outgoing: Vec::new(),
            log: Vec::new(),
            holdback: HoldbackQueue::new(config.max_pending),
            gaps: GapBuffer::new(config.max_gapped),
            last_seen: HashMap::new(),
            applied_events: VecDeque::new(),
            channel_offset: -1,
            reported: vec![0],
            announced: HashSet::from([0]),
            schemas: BTreeMap::new(),
            default_schema: None,
            cursors_item: None,
            characters_item: None,
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.me
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel
    }

    pub fn set_secret_key(&mut self, key: SealKey) {
        self.secret = Some(key);
    }

    /// The visible document text
    pub fn document(&self) -> String {
        self.doc.text()
    }

    pub fn cursor_of(&self, peer: &PeerId) -> Option<usize> {
        self.doc.cursor_of(peer)
    }

    /// Every peer this engine has heard of, local peer first
    pub fn peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.matrix.peers()
    }

    /// Matrix rows, local peer first
    pub fn peer_entries(&self) -> &[PeerEntry] {
        self.matrix.rows()
    }

    pub fn last_sent_seq(&self) -> u64 {
        self.matrix.local_last_sent()
    }

    pub fn channel_offset(&self) -> i64 {
        self.channel_offset
    }

    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    /// Messages waiting on dependencies or sequence gaps
    pub fn pending_len(&self) -> usize {
        self.holdback.len() + self.gaps.len()
    }

    pub fn outgoing_len(&self) -> usize {
        self.outgoing.len()
    }

    pub fn default_schema(&self) -> Option<ItemId> {
        self.default_schema
    }

    /// Total item count of the character list, tombstones included
    pub fn document_total_len(&self) -> usize {
        self.doc.total_len()
    }

    /// Insert `ch` at visible position `index`
    pub fn insert_char(&mut self, index: usize, ch: char) -> Result<()> {
        if index > self.doc.visible_len() {
            return Err(Error::IndexOutOfBounds(index));
        }
        let id = self.next_id();
        let op = self.doc.local_insert(index, ch, id)?;
        self.outgoing.push(op);
        Ok(())
    }

    /// Delete the character at visible position `index`
    pub fn delete_char(&mut self, index: usize) -> Result<()> {
        if index >= self.doc.visible_len() {
            return Err(Error::IndexOutOfBounds(index));
        }
        let at = self.next_id();
        let op = self.doc.local_delete(index, at)?;
        self.outgoing.push(op);
        Ok(())
    }

    /// Move the local cursor to `index`
    pub fn set_cursor(&mut self, index: usize) -> Result<()> {
        let at = self.next_id();
        let op = self.doc.local_set_cursor(self.me, index as u64, at);
        self.outgoing.push(op);
        Ok(())
    }

    /// Frame the outgoing buffer into a sealed message, or `None` if there
    /// is nothing to send. The plaintext is appended to the message log
    /// with offset −1 until the relay acknowledges it.
    pub fn encode_message(&mut self) -> Result<Option<Vec<u8>>> {
        if self.outgoing.is_empty() {
            return Ok(None);
        }
        self.maybe_declare_schema();
        let schema_id = self
            .default_schema
            .ok_or_else(|| Error::Codec("no schema declared".to_string()))?;

        let seq = self.matrix.local_last_sent() + 1;
        let update = self.build_clock_update();

        let mut ops = Vec::with_capacity(self.outgoing.len() + 1);
        ops.push(Op::Clock(update));
        ops.extend(self.outgoing.iter().cloned());

        let timestamp = now_ms();
        let plaintext = Codec::new(&mut self.matrix).encode(schema_id, timestamp, &ops)?;
        let sealed = self.seal_payload(&plaintext)?;

        self.log.push(MessageLogEntry {
            sender_index: 0,
            seq,
            offset: -1,
            payload: plaintext,
        });
        self.matrix.record_sent(seq);
        self.reported = self.matrix.local_clock_snapshot();
        self.announced = (0..self.matrix.len() as u64).collect();
        self.outgoing.clear();

        tracing::debug!(seq, ops = ops.len(), "encoded outgoing message");
        Ok(Some(sealed))
    }

    /// Ingest a payload delivered by the transport.
    ///
    /// `seq` must be contiguous per sender; a gap parks the payload and
    /// reports [`Error::OutOfOrderSeqNo`] so the transport can resubscribe
    /// from the last known offset.
    pub fn receive_message(&mut self, sender: PeerId, seq: u64, offset: i64, payload: &[u8]) -> Result<Receipt> {
        if sender == self.me {
            return self.acknowledge(seq, offset);
        }

        let plaintext = self.open_payload(payload)?;
        let last = self.last_seen.get(&sender).copied().unwrap_or(0);
        if seq <= last {
            tracing::debug!(peer = %sender, seq, "duplicate message ignored");
            return Ok(Receipt::Duplicate);
        }
        if seq > last + 1 {
            tracing::warn!(peer = %sender, seq, last_known = last, "sequence gap, parking payload");
            self.gaps.insert(
                sender,
                GapSlot {
                    seq,
                    offset,
                    payload: plaintext,
                },
            )?;
            return Err(Error::OutOfOrderSeqNo {
                last_known: last,
                got: seq,
            });
        }

        let receipt = self.ingest(sender, seq, offset, plaintext)?;
        self.drain();
        Ok(receipt)
    }

    /// Unacknowledged local messages, sealed for retransmission
    pub fn unacknowledged(&self) -> Result<Vec<(u64, Vec<u8>)>> {
        self.log
            .iter()
            .filter(|entry| entry.sender_index == 0 && entry.offset < 0)
            .map(|entry| Ok((entry.seq, self.seal_payload(&entry.payload)?)))
            .collect()
    }

    /// Snapshot the engine. A non-empty outgoing buffer is framed first so
    /// no local edit is dropped; the transport picks it up through
    /// [`Engine::unacknowledged`] after restart.
    pub fn save(&mut self) -> Result<Vec<u8>> {
        if !self.outgoing.is_empty() {
            self.encode_message()?;
        }
        self.matrix.set_local_next_ts(self.clock + 1);
        let snapshot = PeerState {
            channel: self.channel,
            channel_offset: self.channel_offset,
            secret_key: self.secret,
            default_schema: self.default_schema,
            cursors_item: self.cursors_item,
            characters_item: self.characters_item,
            peers: self.matrix.rows().to_vec(),
            log: self.log.clone(),
            data: DocumentState::from(&self.doc),
        };
        state::encode_state(&snapshot)
    }

    /// Restore an engine from a snapshot.
    ///
    /// The message log is replayed against a scratch matrix and document;
    /// the replayed peer order must match the persisted rows and the
    /// replayed document must match the persisted data, otherwise the
    /// snapshot is corrupt and loading refuses.
    pub fn load(bytes: &[u8]) -> Result<Self> {
        Self::load_with_config(bytes, EngineConfig::default())
    }

    pub fn load_with_config(bytes: &[u8], config: EngineConfig) -> Result<Self> {
        let snapshot = state::decode_state(bytes)?;
        let local = snapshot
            .peers
            .first()
            .ok_or_else(|| Error::Serialization("empty peer table".to_string()))?
            .peer;

        let replay = replay_log(local, &snapshot)?;

        let persisted: Vec<PeerId> = snapshot.peers.iter().map(|row| row.peer).collect();
        let replayed: Vec<PeerId> = replay.matrix.peers().collect();
        if persisted != replayed {
            return Err(Error::IndexMismatch);
        }

        let doc = TextDocument::try_from(&snapshot.data)?;
        if doc != replay.doc {
            return Err(Error::SnapshotMismatch);
        }

        let clock = snapshot.peers[0].next_ts.saturating_sub(1).max(replay.clock);
        let mut last_seen = HashMap::new();
        for entry in &snapshot.peers[0].clock {
            if entry.peer != local {
                last_seen.insert(entry.peer, entry.last_seq);
            }
        }

        let PeerState {
            channel,
            channel_offset,
            secret_key,
            default_schema,
            cursors_item,
            characters_item,
            peers,
            log,
            data: _,
        } = snapshot;

        let remote = replay.matrix.into_remote_tables();
        let matrix = PeerMatrix::from_parts(peers, remote)?;

        tracing::info!(peer = %local, entries = log.len(), "restored engine from snapshot");

        Ok(Self {
            me: local,
            channel,
            secret: secret_key,
            clock,
            matrix,
            doc,
            outgoing: Vec::new(),
            log,
            holdback: HoldbackQueue::new(config.max_pending),
            gaps: GapBuffer::new(config.max_gapped),
            last_seen,
            applied_events: VecDeque::new(),
            channel_offset,
            reported: replay.reported,
            announced: replay.announced,
            schemas: replay.schemas,
            default_schema,
            cursors_item,
            characters_item,
        })
    }

    fn next_id(&mut self) -> ItemId {
        self.clock += 1;
        ItemId::new(self.clock, self.me)
    }

    fn seal_payload(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        match &self.secret {
            Some(key) => seal::seal(key, plaintext),
            None => Ok(plaintext.to_vec()),
        }
    }

    fn open_payload(&self, payload: &[u8]) -> Result<Vec<u8>> {
        match &self.secret {
            Some(key) => seal::open(key, payload),
            None => Ok(payload.to_vec()),
        }
    }

    /// Declare the channel schema on first send if none is known yet
    fn maybe_declare_schema(&mut self) {
        if self.default_schema.is_some() {
            return;
        }
        let id = self.next_id();
        let cursors = self.next_id();
        let characters = self.next_id();
        let decl = SchemaDecl {
            id,
            name: "text-document".to_string(),
            cursors,
            characters,
        };
        self.register_schema(&decl);
        self.outgoing.insert(0, Op::Schema(decl));
    }

    /// Cache a declaration. The channel pins the declaration with the
    /// lowest id, so every peer converges on the same schema and roots.
    fn register_schema(&mut self, decl: &SchemaDecl) {
        self.schemas.insert(decl.id, decl.clone());
        if let Some((id, winner)) = self.schemas.iter().next() {
            self.default_schema = Some(*id);
            self.cursors_item = Some(winner.cursors);
            self.characters_item = Some(winner.characters);
        }
    }

    /// Clock rows that changed since the previous message, plus the peer
    /// ids of any index receivers have not been introduced to yet. The
    /// sender's own row is always present.
    fn build_clock_update(&mut self) -> ClockUpdate {
        let snapshot = self.matrix.local_clock_snapshot();
        let mut entries = Vec::new();
        for (index, &current) in snapshot.iter().enumerate() {
            let previous = self.reported.get(index).copied().unwrap_or(0);
            let introduce = !self.announced.contains(&(index as u64));
            if index == 0 || introduce || current != previous {
                if let Some(peer) = self.matrix.index_to_peer_id(index as u64) {
                    entries.push(ClockEntry {
                        peer,
                        last_seq: current,
                        announce: introduce,
                    });
                }
            }
        }
        let next_ts = self
            .outgoing
            .iter()
            .filter_map(Op::ts)
            .min()
            .unwrap_or(self.clock + 1);
        ClockUpdate { next_ts, entries }
    }

    /// Record the relay's acknowledgement of an own message
    fn acknowledge(&mut self, seq: u64, offset: i64) -> Result<Receipt> {
        match self
            .log
            .iter_mut()
            .find(|entry| entry.sender_index == 0 && entry.seq == seq)
        {
            Some(entry) if entry.offset < 0 => {
                entry.offset = offset;
                if offset >= 0 {
                    self.channel_offset = self.channel_offset.max(offset);
                }
                tracing::debug!(seq, offset, "own message acknowledged");
                Ok(Receipt::Acked)
            }
            Some(_) => Ok(Receipt::Duplicate),
            None => Err(Error::OutOfOrderSeqNo {
                last_known: self.matrix.local_last_sent(),
                got: seq,
            }),
        }
    }

    /// Decode a contiguous payload and apply or park it
    fn ingest(&mut self, sender: PeerId, seq: u64, offset: i64, plaintext: Vec<u8>) -> Result<Receipt> {
        // Decode against a staged matrix so a malformed message leaves no
        // half-registered mappings behind.
        let mut staged = self.matrix.clone();
        let message = Codec::new(&mut staged).decode(sender, seq, &plaintext)?;
        self.matrix = staged;
        self.last_seen.insert(sender, seq);

        let missing = self.missing_deps(&message);
        if !missing.is_empty() {
            tracing::debug!(peer = %sender, seq, missing = missing.len(), "message awaiting dependencies");
            self.holdback
                .buffer(PendingMessage::new(sender, seq, offset, message, plaintext, missing))?;
            return Ok(Receipt::Buffered);
        }

        self.apply_message(seq, offset, &message, plaintext)?;
        Ok(Receipt::Applied)
    }

    /// Dependencies reported by the message's clock updates that the local
    /// peer has not applied yet
    fn missing_deps(&self, message: &Message) -> Vec<MsgKey> {
        let mut missing = Vec::new();
        for op in &message.ops {
            if let Op::Clock(update) = op {
                missing.extend(self.matrix.missing_deps(update));
            }
        }
        missing
    }

    /// Validate then apply every operation of a message, in order. A
    /// message applies fully or not at all.
    fn apply_message(&mut self, seq: u64, offset: i64, message: &Message, plaintext: Vec<u8>) -> Result<()> {
        self.validate_message(message)?;

        for op in &message.ops {
            match op {
                Op::Clock(update) => {
                    self.matrix.apply_clock_update(message.origin, update)?;
                    self.clock = self.clock.max(update.next_ts.saturating_sub(1));
                }
                Op::Schema(decl) => self.register_schema(decl),
                other => {
                    self.doc.apply(other)?;
                    if let Some(ts) = other.ts() {
                        self.clock = self.clock.max(ts);
                    }
                }
            }
        }

        self.matrix.record_applied(message.origin, seq);
        let sender_index = self.matrix.peer_id_to_index(message.origin);
        self.log.push(MessageLogEntry {
            sender_index,
            seq,
            offset,
            payload: plaintext,
        });
        if offset >= 0 {
            self.channel_offset = self.channel_offset.max(offset);
        }
        self.applied_events.push_back((message.origin, seq));
        tracing::debug!(peer = %message.origin, seq, offset, "applied message");
        Ok(())
    }

    fn validate_message(&self, message: &Message) -> Result<()> {
        let mut incoming: HashSet<ItemId> = HashSet::new();
        for op in &message.ops {
            match op {
                Op::Clock(update) => self.matrix.check_clock_update(message.origin, update)?,
                Op::Schema(_) => {}
                Op::Insert { after, id, .. } => {
                    if let Some(reference) = after {
                        if !self.doc.contains_item(reference) && !incoming.contains(reference) {
                            return Err(Error::UnknownItem(*reference));
                        }
                    }
                    incoming.insert(*id);
                }
                Op::Delete { target, .. } => {
                    if !self.doc.contains_item(target) && !incoming.contains(target) {
                        return Err(Error::UnknownItem(*target));
                    }
                }
                Op::SetCursor { .. } => {}
            }
        }
        Ok(())
    }

    /// Flush newly ready holdback messages and newly contiguous gapped
    /// payloads until nothing further applies
    fn drain(&mut self) {
        loop {
            let mut progressed = false;

            while let Some(key) = self.applied_events.pop_front() {
                for pending in self.holdback.on_applied(key) {
                    let payload = pending.payload.clone();
                    match self.apply_message(pending.seq, pending.offset, &pending.message, payload) {
                        Ok(()) => progressed = true,
                        Err(err) => tracing::warn!(
                            peer = %pending.origin,
                            seq = pending.seq,
                            error = %err,
                            "dropping pending message that failed to apply"
                        ),
                    }
                }
            }

            for sender in self.gaps.senders() {
                loop {
                    let expected = self.last_seen.get(&sender).copied().unwrap_or(0) + 1;
                    let Some(slot) = self.gaps.take_next(&sender, expected) else {
                        break;
                    };
                    let seq = slot.seq;
                    match self.ingest(sender, seq, slot.offset, slot.payload) {
                        Ok(_) => progressed = true,
                        Err(err) => tracing::warn!(
                            peer = %sender,
                            seq,
                            error = %err,
                            "dropping gapped message that failed to decode"
                        ),
                    }
                }
            }

            if !progressed && self.applied_events.is_empty() {
                break;
            }
        }
    }
}

/// Result of replaying a persisted message log from scratch
struct Replayed {
    matrix: PeerMatrix,
    doc: TextDocument,
    schemas: BTreeMap<ItemId, SchemaDecl>,
    reported: Vec<u64>,
    announced: HashSet<u64>,
    clock: u64,
}

/// Rebuild matrix and document by replaying the log.
///
/// The log is kept in apply order: remote entries land when they apply,
/// local entries when they are framed. That order is a causal
/// linearization of the same operation set (a local edit can only
/// reference material that was already applied), so replaying it verbatim
/// reconstructs both the document and the exact index-assignment order.
fn replay_log(local: PeerId, snapshot: &PeerState) -> Result<Replayed> {
    let mut matrix = PeerMatrix::new(local);
    let mut doc = TextDocument::new();
    let mut schemas = BTreeMap::new();
    let mut reported = vec![0u64];
    let mut announced: HashSet<u64> = HashSet::from([0]);
    let mut clock = 0u64;

    for entry in &snapshot.log {
        let sender = snapshot
            .peers
            .get(entry.sender_index as usize)
            .ok_or(Error::IndexMismatch)?
            .peer;
        if entry.offset < 0 && sender != local {
            return Err(Error::Serialization("unacknowledged remote log entry".to_string()));
        }

        let message = Codec::new(&mut matrix).decode(sender, entry.seq, &entry.payload)?;
        for op in &message.ops {
            match op {
                Op::Clock(update) => {
                    matrix.apply_clock_update(sender, update)?;
                    clock = clock.max(update.next_ts.saturating_sub(1));
                    if sender == local {
                        for clock_entry in &update.entries {
                            if clock_entry.announce {
                                announced.insert(matrix.peer_id_to_index(clock_entry.peer));
                            }
                        }
                    }
                }
                Op::Schema(decl) => {
                    schemas.insert(decl.id, decl.clone());
                }
                other => {
                    doc.apply(other)?;
                    if let Some(ts) = other.ts() {
                        clock = clock.max(ts);
                    }
                }
            }
        }

        if sender == local {
            matrix.record_sent(entry.seq);
            reported = matrix.local_clock_snapshot();
        } else {
            matrix.record_applied(sender, entry.seq);
        }
    }

    Ok(Replayed {
        matrix,
        doc,
        schemas,
        reported,
        announced,
        clock,
    })
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn peer(n: u8) -> PeerId {
        PeerId([n; 32])
    }

    fn channel() -> ChannelId {
        ChannelId(Uuid::from_bytes([1; 16]))
    }

    #[test]
    fn empty_outgoing_encodes_to_none() {
        let mut engine = Engine::new_peer(peer(1), channel());
        assert!(engine.encode_message().unwrap().is_none());
        assert_eq!(engine.log_len(), 0);
    }

    #[test]
    fn local_timestamps_strictly_increase() {
        let mut engine = Engine::new_peer(peer(1), channel());
        engine.insert_char(0, 'a').unwrap();
        engine.insert_char(1, 'b').unwrap();
        engine.delete_char(0).unwrap();
        engine.set_cursor(0).unwrap();

        let mut timestamps: Vec<u64> = engine.outgoing.iter().filter_map(Op::ts).collect();
        let sorted = {
            let mut copy = timestamps.clone();
            copy.sort_unstable();
            copy
        };
        assert_eq!(timestamps, sorted);
        timestamps.dedup();
        assert_eq!(timestamps.len(), 4);
    }

    #[test]
    fn sender_seq_starts_at_one_and_increases() {
        let mut engine = Engine::new_peer(peer(1), channel());
        engine.insert_char(0, 'a').unwrap();
        engine.encode_message().unwrap();
        assert_eq!(engine.last_sent_seq(), 1);

        engine.insert_char(1, 'b').unwrap();
        engine.encode_message().unwrap();
        assert_eq!(engine.last_sent_seq(), 2);
        assert_eq!(engine.log_len(), 2);
    }

    #[test]
    fn ack_for_unsent_message_is_an_error() {
        let mut engine = Engine::new_peer(peer(1), channel());
        let result = engine.receive_message(peer(1), 4, 0, &[]);
        assert!(matches!(
            result,
            Err(Error::OutOfOrderSeqNo { last_known: 0, got: 4 })
        ));
    }

    #[test]
    fn first_message_declares_the_schema_once() {
        let mut engine = Engine::new_peer(peer(1), channel());
        engine.insert_char(0, 'a').unwrap();
        engine.encode_message().unwrap();
        let declared = engine.default_schema();
        assert!(declared.is_some());

        engine.insert_char(1, 'b').unwrap();
        engine.encode_message().unwrap();
        assert_eq!(engine.default_schema(), declared);
        assert_eq!(engine.schemas.len(), 1);
    }
}
