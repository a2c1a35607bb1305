//! Cryptographic boundary for sealed payloads
//!
//! The engine treats message payloads as opaque envelopes: bytes go in,
//! sealed bytes come out, and tampering fails closed on open.

pub mod seal;

pub use seal::SealKey;
