//! Weft Core Library
//!
//! The core of a peer-to-peer collaborative text editor built on CRDTs.
//! Peers independently mutate a shared document, broadcast operations
//! through a relay, and converge to identical state regardless of delivery
//! order. This library provides:
//! - Per-peer vector clock bookkeeping and peer-index translation
//! - An ordered-list CRDT (RGA) with tombstones and an LWW cursor map
//! - The operation log, causal holdback buffering, and replay engine
//! - The deterministic binary wire codec and sealed-payload boundary
//!
//! The terminal UI, the relay transport, and the on-disk container live in
//! separate crates and call into [`Engine`].

pub mod crdt;
pub mod crypto;
pub mod document;
pub mod engine;
pub mod state;
pub mod types;
pub mod wire;

pub use engine::{Engine, EngineConfig, Receipt};
pub use types::*;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("persisted peer order does not match replayed order")]
    IndexMismatch,

    #[error("replayed document does not match persisted snapshot")]
    SnapshotMismatch,

    #[error("no peer mapping declared for wire index {index}")]
    UnknownPeerIndex { index: u64 },

    #[error("sequence gap: last known {last_known}, got {got}")]
    OutOfOrderSeqNo { last_known: u64, got: u64 },

    #[error("clock regression in update from {origin}")]
    ClockRegression { origin: PeerId },

    #[error("unknown operation variant tag {tag}")]
    UnknownOperationVariant { tag: u32 },

    #[error("payload failed to open")]
    SealOpen,

    #[error("pending-message buffer is full")]
    HoldbackFull,

    #[error("operation targets unknown item {0}")]
    UnknownItem(ItemId),

    #[error("index {0} out of bounds")]
    IndexOutOfBounds(usize),

    #[error("cryptographic operation failed: {0}")]
    Crypto(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
