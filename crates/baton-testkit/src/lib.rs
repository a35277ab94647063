//! Baton Testing Infrastructure
//!
//! Shared setup for service and integration tests: deterministic
//! identifiers, a session fixture on a simulated clock, and feed helpers.
//!
//! ```rust,no_run
//! use baton_testkit::*;
//!
//! # async fn demo() {
//! let fixture = SessionFixture::builder().standard(2).build().await;
//! fixture.act(fixture.privileged, "the gates open").await.unwrap();
//! assert_eq!(fixture.turn().await.holder, Some(participant(2)));
//! # }
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

pub mod feed;
pub mod fixtures;
pub mod ids;

pub use baton_effects::SimulatedTimeHandler;
pub use feed::*;
pub use fixtures::*;
pub use ids::*;
