//! Baton Effects - handler implementations
//!
//! Concrete handlers for the effect interfaces declared in `baton-core`:
//!
//! - `MemoryStore`: transactional in-memory store, one bounded-wait critical
//!   section per operation
//! - `RealTimeHandler` and `SimulatedTimeHandler`
//! - `AllowAllPolicy` and `LengthLimitPolicy`
//! - `BatonEffectSystem`: all of the above behind one `TurnEffects` handle

#![allow(missing_docs)]
#![forbid(unsafe_code)]

pub mod policy;
pub mod storage;
pub mod system;
pub mod time;

pub use policy::{AllowAllPolicy, LengthLimitPolicy};
pub use storage::{MemoryStore, StoreSnapshot};
pub use system::BatonEffectSystem;
pub use time::{RealTimeHandler, SimulatedTimeHandler};
