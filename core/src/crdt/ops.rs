//! In-memory operation types
//!
//! These are the decoded forms: every peer reference is a full [`PeerId`].
//! Compact per-sender peer indices exist only on the wire and are translated
//! by the codec against the peer matrix.

use crate::types::{ItemId, PeerId};

/// One row of a reported vector clock
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockEntry {
    /// The peer this entry is about
    pub peer: PeerId,

    /// Highest sequence number the reporting peer has observed from `peer`
    pub last_seq: u64,

    /// Whether the sender shipped the full peer id alongside its index,
    /// introducing the mapping to receivers
    pub announce: bool,
}

/// A sender's reported vector clock, as carried at the front of a message.
///
/// The rows describe the sender's state before the message itself: the
/// sender's own entry reports one less than the message's sequence number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClockUpdate {
    /// The lowest logical timestamp consumed by the operations that follow
    pub next_ts: u64,

    /// Changed rows since the sender's previous message
    pub entries: Vec<ClockEntry>,
}

/// Declaration of the channel schema and the document roots
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaDecl {
    /// Identifier of this declaration; also the schema cache key
    pub id: ItemId,

    /// Human-readable schema name
    pub name: String,

    /// Root item of the cursor map
    pub cursors: ItemId,

    /// Root item of the character list
    pub characters: ItemId,
}

/// A single operation inside a message
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    /// Vector clock report; also introduces peer-index mappings
    Clock(ClockUpdate),

    /// Schema declaration
    Schema(SchemaDecl),

    /// Insert a character after `after` (`None` for beginning-of-document)
    Insert {
        after: Option<ItemId>,
        id: ItemId,
        ch: char,
    },

    /// Tombstone the item `target`
    Delete { target: ItemId, at: ItemId },

    /// Move a peer's cursor to a visible position
    SetCursor {
        peer: PeerId,
        position: u64,
        at: ItemId,
    },
}

impl Op {
    /// The logical timestamp this operation consumed, if any
    pub fn ts(&self) -> Option<u64> {
        match self {
            Op::Clock(_) => None,
            Op::Schema(decl) => Some(decl.id.ts),
            Op::Insert { id, .. } => Some(id.ts),
            Op::Delete { at, .. } => Some(at.ts),
            Op::SetCursor { at, .. } => Some(at.ts),
        }
    }
}

/// A decoded message: an ordered batch of operations from one sender
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// The peer that produced the message
    pub origin: PeerId,

    /// Sender sequence number, from the transport envelope
    pub seq: u64,

    /// Schema the sender believes governs the channel
    pub schema_id: ItemId,

    /// Wall-clock milliseconds at encode time; informational only
    pub timestamp: i64,

    /// Operations, applied strictly in order
    pub ops: Vec<Op>,
}
