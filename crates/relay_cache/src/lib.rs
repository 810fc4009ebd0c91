//! Named response cache: entries, key-value store backends and the
//! controller that decides lookups, writes and invalidation.

pub mod controller;
pub mod disk;
pub mod entry;
pub mod error;
pub mod memory;
pub mod policy;
pub mod store;

pub use controller::CacheController;
pub use disk::DiskStore;
pub use entry::CacheEntry;
pub use error::CacheError;
pub use memory::MemoryStore;
pub use policy::CacheDirective;
pub use store::KvStore;
