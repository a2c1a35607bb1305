//! CRDT (Conflict-free Replicated Data Types) module
//!
//! This module implements the replicated core of the engine, including:
//! - The peer matrix: vector clocks, peer-index translation, causal readiness
//! - The ordered-list CRDT (RGA) with tombstones
//! - The last-writer-wins map used for cursors
//! - In-memory operation types
//! - Holdback buffering for operations awaiting dependencies

pub mod holdback;
pub mod list;
pub mod lww;
pub mod matrix;
pub mod ops;


pub use holdback::{GapBuffer, HoldbackQueue, PendingMessage};
pub use list::{ListItem, OrderedList};
pub use lww::LwwMap;
pub use matrix::{PeerEntry, PeerMatrix, PeerVClockEntry};
pub use ops::{ClockEntry, ClockUpdate, Message, Op, SchemaDecl};
