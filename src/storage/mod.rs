//! Fact storage: triple indexes, the versioned store and its journals.
//!
//! [`FactStore`] keeps every partition in memory and routes durable writes
//! through a [`FactJournal`]. [`MemoryJournal`] keeps nothing; the
//! `persistent` feature adds a WAL + segment journal on disk.

mod fact_store;
mod index;
mod memory;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use fact_store::{FactStore, Partition, StoreStats, WriteSession};
pub use index::TripleSet;
pub use memory::MemoryJournal;
pub use traits::{FactJournal, RecoveredState, StorageError};
