//! nimbus-state — embedded state store for the simulated compute service.
//!
//! Backed by [redb](https://docs.rs/redb), holds the instance records and
//! launch templates of one account/region scope. The emulator runs it on
//! redb's in-memory backend; an on-disk database can be opened for
//! inspection or long-lived sessions.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns
//! and keyed by their resource id. Instance ordering is carried by a
//! monotonically increasing `launch_index` stored in each record.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
