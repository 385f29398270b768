//! nimbus-fleet — elastic fleet request emulation.
//!
//! Turns a declarative fleet configuration into a discrete set of
//! simulated instances whose weighted capacity covers the requested
//! target, then keeps that set reconciled as the target is modified or
//! the request is cancelled.
//!
//! # Architecture
//!
//! ```text
//! BackendRegistry (one FleetBackend per account/region scope)
//!   └── FleetBackend
//!       ├── StateStore (instances, launch templates)
//!       ├── SimulatedCompute (InstanceProvisioner + LaunchTemplateResolver)
//!       └── FleetManager
//!           ├── LaunchSpecPool   (immutable snapshot per request)
//!           ├── allocate()       (pure: pool × capacity × strategy → Allocation)
//!           └── FleetRequest     (target/fulfilled capacity, state machine)
//! ```
//!
//! Every operation runs to completion synchronously; the manager
//! serializes mutations behind a single registry lock.

pub mod allocation;
pub mod compute;
pub mod error;
pub mod manager;
pub mod pool;
pub mod provider;
pub mod registry;
pub mod request;
pub mod types;

pub use allocation::{Allocation, AllocationItem, MAX_ALLOCATION_UNITS, allocate};
pub use compute::SimulatedCompute;
pub use error::{ErrorKind, FleetError, FleetResult};
pub use manager::{CancelledFleetRequest, FleetManager};
pub use pool::{LaunchSpecPool, PoolEntry};
pub use provider::{InstanceHandle, InstanceProvisioner, LaunchTemplateResolver};
pub use registry::{BackendRegistry, FleetBackend};
pub use request::{ActiveInstance, FleetRequest, FleetRequestSnapshot, FleetRequestState};
pub use types::*;
