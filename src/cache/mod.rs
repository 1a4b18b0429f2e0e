//! Expiring key/value cache
//!
//! The cache is a performance optimization layered over a persistent key/value
//! store. It is never a source of truth:
//! - Entries carry their write time and TTL and are evicted lazily on read
//! - Storage failures degrade to a cache miss and are only logged
//! - Keys come from a fixed, enumerated set, so no background sweep is needed

pub mod entry;
pub mod expiring;
pub mod keys;
pub mod store;

pub use entry::*;
pub use expiring::*;
pub use keys::*;
pub use store::*;
