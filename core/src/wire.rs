//! Binary wire codec
//!
//! Translates between in-memory operations (full [`PeerId`]s) and wire
//! records (compact per-sender peer indices), and frames messages. Every
//! operation travels as an explicitly tagged two-element array
//! `[tag, payload]`; unknown tags are fatal for the message.
//!
//! Index translation happens against the peer matrix: on encode the local
//! peer is always wire index 0, on decode indices resolve through the
//! sender's declared mappings. A clock update introducing a new index must
//! precede any operation that references it, so the decoder registers
//! mappings the moment it walks past a clock update.

use crate::crdt::matrix::PeerMatrix;
use crate::crdt::ops::{ClockEntry, ClockUpdate, Message, Op, SchemaDecl};
use crate::types::{ChannelId, ItemId, PeerId};
use crate::{Error, Result};
use minicbor::{Decode, Encode};

const TAG_CLOCK: u32 = 0;
const TAG_SCHEMA: u32 = 1;
const TAG_INSERT: u32 = 2;
const TAG_DELETE: u32 = 3;
const TAG_SET_CURSOR: u32 = 4;

/// `ItemId` in wire form: the peer travels as a compact index
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub struct WireItemId {
    #[n(0)]
    pub ts: u64,

    #[n(1)]
    pub peer_index: u64,
}

/// One clock row on the wire. `peer_id` is present only when the sender is
/// introducing the index to receivers.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct WirePeerClock {
    #[n(0)]
    pub peer_id: Option<PeerId>,

    #[n(1)]
    pub peer_index: u64,

    #[n(2)]
    pub last_seq: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct WireClockUpdate {
    #[n(0)]
    pub next_ts: u64,

    /// Rows in ascending `peer_index` order
    #[n(1)]
    pub entries: Vec<WirePeerClock>,
}

#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct WireSchemaUpdate {
    #[n(0)]
    pub id: WireItemId,

    #[n(1)]
    pub name: String,

    #[n(2)]
    pub cursors: WireItemId,

    #[n(3)]
    pub characters: WireItemId,
}

#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct WireInsert {
    #[n(0)]
    pub after: Option<WireItemId>,

    #[n(1)]
    pub id: WireItemId,

    #[n(2)]
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct WireDelete {
    #[n(0)]
    pub target: WireItemId,

    #[n(1)]
    pub at: WireItemId,
}

#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct WireSetCursor {
    #[n(0)]
    pub peer_index: u64,

    #[n(1)]
    pub position: u64,

    #[n(2)]
    pub at: WireItemId,
}

/// Relay request: publish a sealed payload on a channel
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct SendMessage {
    #[n(0)]
    pub channel: ChannelId,

    #[n(1)]
    pub sender_seq: u64,

    #[n(2)]
    #[cbor(with = "minicbor::bytes")]
    pub payload: Vec<u8>,
}

/// Relay request: replay a channel from an offset
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct SubscribeToChannel {
    #[n(0)]
    pub channel: ChannelId,

    #[n(1)]
    pub start_offset: i64,
}

/// Relay response: a message on a subscribed channel
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct ReceiveMessage {
    #[n(0)]
    pub channel: ChannelId,

    #[n(1)]
    pub sender: PeerId,

    #[n(2)]
    pub sender_seq: u64,

    #[n(3)]
    pub offset: i64,

    #[n(4)]
    #[cbor(with = "minicbor::bytes")]
    pub payload: Vec<u8>,
}

/// Relay response: a publish was rejected
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct SendMessageError {
    #[n(0)]
    pub channel: ChannelId,

    #[n(1)]
    pub last_known_seq: u64,
}

fn enc_err<E: std::fmt::Display>(err: E) -> Error {
    Error::Serialization(err.to_string())
}

fn dec_err(err: minicbor::decode::Error) -> Error {
    Error::Codec(err.to_string())
}

/// Stateless translator between in-memory operations and wire bytes,
/// borrowing the engine's peer matrix for index translation.
pub struct Codec<'a> {
    matrix: &'a mut PeerMatrix,
}

impl<'a> Codec<'a> {
    pub fn new(matrix: &'a mut PeerMatrix) -> Self {
        Self { matrix }
    }

    /// Serialize a message: `[schema_id, timestamp, operations]`
    pub fn encode(&mut self, schema_id: ItemId, timestamp: i64, ops: &[Op]) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let mut e = minicbor::Encoder::new(&mut buf);

        let schema = self.item_out(&schema_id);
        e.array(3).map_err(enc_err)?;
        e.encode(&schema).map_err(enc_err)?;
        e.i64(timestamp).map_err(enc_err)?;
        e.array(ops.len() as u64).map_err(enc_err)?;

        for op in ops {
            match op {
                Op::Clock(update) => {
                    let wire = self.clock_out(update);
                    e.array(2).map_err(enc_err)?;
                    e.u32(TAG_CLOCK).map_err(enc_err)?;
                    e.encode(&wire).map_err(enc_err)?;
                }
                Op::Schema(decl) => {
                    let wire = WireSchemaUpdate {
                        id: self.item_out(&decl.id),
                        name: decl.name.clone(),
                        cursors: self.item_out(&decl.cursors),
                        characters: self.item_out(&decl.characters),
                    };
                    e.array(2).map_err(enc_err)?;
                    e.u32(TAG_SCHEMA).map_err(enc_err)?;
                    e.encode(&wire).map_err(enc_err)?;
                }
                Op::Insert { after, id, ch } => {
                    let wire = WireInsert {
                        after: after.as_ref().map(|reference| self.item_out(reference)),
                        id: self.item_out(id),
                        value: ch.to_string(),
                    };
                    e.array(2).map_err(enc_err)?;
                    e.u32(TAG_INSERT).map_err(enc_err)?;
                    e.encode(&wire).map_err(enc_err)?;
                }
                Op::Delete { target, at } => {
                    let wire = WireDelete {
                        target: self.item_out(target),
                        at: self.item_out(at),
                    };
                    e.array(2).map_err(enc_err)?;
                    e.u32(TAG_DELETE).map_err(enc_err)?;
                    e.encode(&wire).map_err(enc_err)?;
                }
                Op::SetCursor { peer, position, at } => {
                    let wire = WireSetCursor {
                        peer_index: self.matrix.peer_id_to_index(*peer),
                        position: *position,
                        at: self.item_out(at),
                    };
                    e.array(2).map_err(enc_err)?;
                    e.u32(TAG_SET_CURSOR).map_err(enc_err)?;
                    e.encode(&wire).map_err(enc_err)?;
                }
            }
        }

        Ok(buf)
    }

    /// Decode a message from `origin`, registering peer-index mappings as
    /// clock updates are walked so later operations can resolve.
    pub fn decode(&mut self, origin: PeerId, seq: u64, bytes: &[u8]) -> Result<Message> {
        let mut d = minicbor::Decoder::new(bytes);

        if d.array().map_err(dec_err)? != Some(3) {
            return Err(Error::Codec("malformed message record".to_string()));
        }
        let wire_schema: WireItemId = d.decode().map_err(dec_err)?;
        let timestamp = d.i64().map_err(dec_err)?;
        let count = d
            .array()
            .map_err(dec_err)?
            .ok_or_else(|| Error::Codec("indefinite operation list".to_string()))?;

        let mut ops = Vec::with_capacity(count as usize);
        for _ in 0..count {
            if d.array().map_err(dec_err)? != Some(2) {
                return Err(Error::Codec("malformed operation frame".to_string()));
            }
            let tag = d.u32().map_err(dec_err)?;
            let op = match tag {
                TAG_CLOCK => {
                    let wire: WireClockUpdate = d.decode().map_err(dec_err)?;
                    Op::Clock(self.clock_in(origin, &wire)?)
                }
                TAG_SCHEMA => {
                    let wire: WireSchemaUpdate = d.decode().map_err(dec_err)?;
                    Op::Schema(SchemaDecl {
                        id: self.item_in(origin, &wire.id)?,
                        name: wire.name,
                        cursors: self.item_in(origin, &wire.cursors)?,
                        characters: self.item_in(origin, &wire.characters)?,
                    })
                }
                TAG_INSERT => {
                    let wire: WireInsert = d.decode().map_err(dec_err)?;
                    let after = match &wire.after {
                        None => None,
                        Some(reference) => Some(self.item_in(origin, reference)?),
                    };
                    let mut chars = wire.value.chars();
                    let ch = chars
                        .next()
                        .ok_or_else(|| Error::Codec("empty insert value".to_string()))?;
                    if chars.next().is_some() {
                        return Err(Error::Codec("insert value is not a single character".to_string()));
                    }
                    Op::Insert {
                        after,
                        id: self.item_in(origin, &wire.id)?,
                        ch,
                    }
                }
                TAG_DELETE => {
                    let wire: WireDelete = d.decode().map_err(dec_err)?;
                    Op::Delete {
                        target: self.item_in(origin, &wire.target)?,
                        at: self.item_in(origin, &wire.at)?,
                    }
                }
                TAG_SET_CURSOR => {
                    let wire: WireSetCursor = d.decode().map_err(dec_err)?;
                    Op::SetCursor {
                        peer: self.matrix.remote_index_to_peer_id(origin, wire.peer_index)?,
                        position: wire.position,
                        at: self.item_in(origin, &wire.at)?,
                    }
                }
                tag => return Err(Error::UnknownOperationVariant { tag }),
            };
            ops.push(op);
        }

        // The schema header precedes the clock updates that may introduce
        // its index, so it resolves last.
        let schema_id = self.item_in(origin, &wire_schema)?;

        Ok(Message {
            origin,
            seq,
            schema_id,
            timestamp,
            ops,
        })
    }

    fn item_out(&mut self, id: &ItemId) -> WireItemId {
        WireItemId {
            ts: id.ts,
            peer_index: self.matrix.peer_id_to_index(id.peer),
        }
    }

    fn item_in(&mut self, origin: PeerId, wire: &WireItemId) -> Result<ItemId> {
        Ok(ItemId {
            ts: wire.ts,
            peer: self.matrix.remote_index_to_peer_id(origin, wire.peer_index)?,
        })
    }

    fn clock_out(&mut self, update: &ClockUpdate) -> WireClockUpdate {
        let mut entries: Vec<WirePeerClock> = update
            .entries
            .iter()
            .map(|entry| WirePeerClock {
                peer_id: entry.announce.then_some(entry.peer),
                peer_index: self.matrix.peer_id_to_index(entry.peer),
                last_seq: entry.last_seq,
            })
            .collect();
        entries.sort_by_key(|entry| entry.peer_index);
        WireClockUpdate {
            next_ts: update.next_ts,
            entries,
        }
    }

    fn clock_in(&mut self, origin: PeerId, wire: &WireClockUpdate) -> Result<ClockUpdate> {
        let mut entries = Vec::with_capacity(wire.entries.len());
        let mut previous_index = None;
        for entry in &wire.entries {
            if previous_index.is_some_and(|index| entry.peer_index <= index) {
                return Err(Error::Codec("clock entries out of index order".to_string()));
            }
            previous_index = Some(entry.peer_index);

            let peer = self
                .matrix
                .peer_index_mapping(origin, entry.peer_id, entry.peer_index)?;
            entries.push(ClockEntry {
                peer,
                last_seq: entry.last_seq,
                announce: entry.peer_id.is_some(),
            });
        }
        Ok(ClockUpdate {
            next_ts: wire.next_ts,
            entries,
        })
    }
}
