//! Durable keyed storage primitives.
//!
//! Everything the engine persists goes through these helpers:
//! - Checksummed, versioned frames around MessagePack payloads
//! - Atomic whole-file replacement (write temp, fsync, rename)
//! - Hashing of user and device identifiers into directory names
//! - Per-key locks so writers on distinct keys never contend

pub mod frame;
mod keys;
mod locks;

pub use frame::write_atomic;
pub use keys::{key_dir, validate_key};
pub use locks::KeyedLocks;
