//! Persisted peer state
//!
//! The whole engine serializes to a single snapshot record: channel
//! identity, secret key, the peer matrix rows, the message log, and the
//! document. Log payloads are stored opened (the snapshot already carries
//! the secret), so startup replay never needs the seal boundary.

use crate::crdt::list::{ListItem, OrderedList};
use crate::crdt::matrix::PeerEntry;
use crate::crypto::SealKey;
use crate::document::TextDocument;
use crate::types::{ChannelId, ItemId, PeerId};
use crate::{Error, Result};
use minicbor::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// One sent or applied message, retained for replay.
///
/// `offset` is −1 until the relay acknowledges the message; it transitions
/// exactly once.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct MessageLogEntry {
    /// Local index of the sender
    #[n(0)]
    pub sender_index: u64,

    /// Sender sequence number, strictly increasing from 1
    #[n(1)]
    pub seq: u64,

    /// Relay-assigned channel offset, or −1
    #[n(2)]
    pub offset: i64,

    /// Opened message bytes
    #[n(3)]
    #[cbor(with = "minicbor::bytes")]
    pub payload: Vec<u8>,
}

/// One persisted list slot
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct ItemState {
    #[n(0)]
    pub id: ItemId,

    #[n(1)]
    pub after: Option<ItemId>,

    /// Single-character payload, absent on tombstones
    #[n(2)]
    pub value: Option<String>,

    #[n(3)]
    pub delete_ts: Option<ItemId>,
}

/// One persisted cursor register
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct CursorState {
    #[n(0)]
    pub peer: PeerId,

    #[n(1)]
    pub position: u64,

    #[n(2)]
    pub updated: ItemId,
}

/// Persisted form of [`TextDocument`]
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct DocumentState {
    #[n(0)]
    pub items: Vec<ItemState>,

    #[n(1)]
    pub cursors: Vec<CursorState>,
}

/// The whole-engine snapshot record
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct PeerState {
    #[n(0)]
    pub channel: ChannelId,

    /// Highest applied channel offset, −1 before any acknowledged message
    #[n(1)]
    pub channel_offset: i64,

    #[n(2)]
    pub secret_key: Option<SealKey>,

    #[n(3)]
    pub default_schema: Option<ItemId>,

    #[n(4)]
    pub cursors_item: Option<ItemId>,

    #[n(5)]
    pub characters_item: Option<ItemId>,

    /// Matrix rows; row 0 is the local peer
    #[n(6)]
    pub peers: Vec<PeerEntry>,

    #[n(7)]
    pub log: Vec<MessageLogEntry>,

    #[n(8)]
    pub data: DocumentState,
}

impl From<&TextDocument> for DocumentState {
    fn from(doc: &TextDocument) -> Self {
        Self {
            items: doc
                .characters
                .items()
                .iter()
                .map(|item| ItemState {
                    id: item.id,
                    after: item.after,
                    value: item.value.map(|ch| ch.to_string()),
                    delete_ts: item.delete_ts,
                })
                .collect(),
            cursors: doc
                .cursors
                .iter()
                .map(|(peer, register)| CursorState {
                    peer: *peer,
                    position: register.value,
                    updated: register.updated,
                })
                .collect(),
        }
    }
}

impl TryFrom<&DocumentState> for TextDocument {
    type Error = Error;

    fn try_from(state: &DocumentState) -> Result<TextDocument> {
        let mut items = Vec::with_capacity(state.items.len());
        for item in &state.items {
            let value = match &item.value {
                None => None,
                Some(text) => {
                    let mut chars = text.chars();
                    let ch = chars
                        .next()
                        .ok_or_else(|| Error::Serialization("empty item value".to_string()))?;
                    if chars.next().is_some() {
                        return Err(Error::Serialization("item value is not a single character".to_string()));
                    }
                    Some(ch)
                }
            };
            if value.is_none() != item.delete_ts.is_some() {
                return Err(Error::Serialization("tombstone and value disagree".to_string()));
            }
            items.push(ListItem {
                id: item.id,
                after: item.after,
                value,
                delete_ts: item.delete_ts,
            });
        }

        let mut doc = TextDocument {
            characters: OrderedList::from_items(items),
            cursors: Default::default(),
        };
        for cursor in &state.cursors {
            doc.cursors.put(cursor.peer, cursor.position, cursor.updated);
        }
        Ok(doc)
    }
}

/// Serialize a snapshot
pub fn encode_state(state: &PeerState) -> Result<Vec<u8>> {
    minicbor::to_vec(state).map_err(|err| Error::Serialization(err.to_string()))
}

/// Deserialize a snapshot
pub fn decode_state(bytes: &[u8]) -> Result<PeerState> {
    minicbor::decode(bytes).map_err(|err| Error::Serialization(err.to_string()))
}
