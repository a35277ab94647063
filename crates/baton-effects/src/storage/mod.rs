//! Layer 3: Store handlers

pub mod memory;
pub mod snapshot;

pub use memory::MemoryStore;
pub use snapshot::{DerivedRecord, StoreSnapshot};
