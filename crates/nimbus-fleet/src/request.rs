//! Fleet request — target/fulfilled capacity bookkeeping and lifecycle.
//!
//! ```text
//!            cancel(terminate = false)
//!   active ───────────────────────────► cancelled_running
//!     │  ▲                                   │
//!     │  └── modify (active → active)        │ cancel(terminate = true)
//!     │                                      ▼
//!     └── cancel(terminate = true) ──► cancelled_terminating ──► cancelled
//! ```
//!
//! A request with no instances and a zero target goes straight from
//! `active` to `cancelled` on any cancellation. `cancelled` is terminal:
//! the manager drops the request from its listable registry.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::allocation::EPSILON;
use crate::error::{FleetError, FleetResult};
use crate::pool::{LaunchSpecPool, PoolEntry};
use crate::provider::InstanceHandle;
use crate::types::{AllocationStrategy, ExcessCapacityTerminationPolicy, FleetRequestConfig};

/// Lifecycle state of a fleet request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FleetRequestState {
    Active,
    CancelledRunning,
    CancelledTerminating,
    Cancelled,
}

impl FleetRequestState {
    pub fn as_str(self) -> &'static str {
        match self {
            FleetRequestState::Active => "active",
            FleetRequestState::CancelledRunning => "cancelled_running",
            FleetRequestState::CancelledTerminating => "cancelled_terminating",
            FleetRequestState::Cancelled => "cancelled",
        }
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: FleetRequestState) -> bool {
        use FleetRequestState::*;
        matches!(
            (self, next),
            (Active, Active)
                | (Active, CancelledRunning)
                | (Active, CancelledTerminating)
                | (Active, Cancelled)
                | (CancelledRunning, CancelledRunning)
                | (CancelledRunning, CancelledTerminating)
                | (CancelledTerminating, Cancelled)
        )
    }

    /// Describable through the request listing.
    pub fn is_listable(self) -> bool {
        matches!(self, FleetRequestState::Active | FleetRequestState::CancelledRunning)
    }
}

impl fmt::Display for FleetRequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An instance currently counted toward a fleet's fulfilled capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActiveInstance {
    pub instance_id: String,
    pub instance_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    pub availability_zone: String,
    pub weighted_capacity: f64,
    /// Pool entry the instance was launched from.
    #[serde(skip)]
    pub launch_spec_index: usize,
    /// Allocation round that launched it (0 for the creation round).
    #[serde(skip)]
    pub allocation_round: u64,
    /// Per-request launch order.
    #[serde(skip)]
    pub sequence: u64,
}

/// What a cancellation needs the manager to do.
#[derive(Debug, Clone, PartialEq)]
pub struct CancelPlan {
    pub previous: FleetRequestState,
    /// State the request ends up in once `terminate` has been carried out.
    pub next: FleetRequestState,
    /// Instances the manager must terminate.
    pub terminate: Vec<String>,
}

impl CancelPlan {
    /// States the request passes through, in order, ending with `next`.
    ///
    /// Reaching `cancelled` from anything but an empty active request goes
    /// through `cancelled_terminating`.
    pub fn path(&self) -> Vec<FleetRequestState> {
        let via_terminating = self.next == FleetRequestState::Cancelled
            && (self.previous != FleetRequestState::Active || !self.terminate.is_empty());
        if via_terminating {
            vec![FleetRequestState::CancelledTerminating, FleetRequestState::Cancelled]
        } else {
            vec![self.next]
        }
    }

    /// Whether every step of [`CancelPlan::path`] is a legal transition.
    pub fn is_legal(&self) -> bool {
        let mut current = self.previous;
        self.path().into_iter().all(|next| {
            let ok = current.can_transition_to(next);
            current = next;
            ok
        })
    }
}

/// A fleet request and its active instances.
#[derive(Debug, Clone)]
pub struct FleetRequest {
    id: String,
    /// The configuration as submitted.
    config: FleetRequestConfig,
    pool: LaunchSpecPool,
    strategy: AllocationStrategy,
    policy: ExcessCapacityTerminationPolicy,
    target_capacity: u32,
    state: FleetRequestState,
    created_at: u64,
    instances: Vec<ActiveInstance>,
    next_round: u64,
    next_sequence: u64,
}

impl FleetRequest {
    pub fn new(
        id: String,
        config: FleetRequestConfig,
        pool: LaunchSpecPool,
        strategy: AllocationStrategy,
        policy: ExcessCapacityTerminationPolicy,
        target_capacity: u32,
        created_at: u64,
    ) -> Self {
        Self {
            id,
            config,
            pool,
            strategy,
            policy,
            target_capacity,
            state: FleetRequestState::Active,
            created_at,
            instances: Vec::new(),
            next_round: 0,
            next_sequence: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &FleetRequestConfig {
        &self.config
    }

    pub fn pool(&self) -> &LaunchSpecPool {
        &self.pool
    }

    pub fn strategy(&self) -> AllocationStrategy {
        self.strategy
    }

    pub fn policy(&self) -> ExcessCapacityTerminationPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: ExcessCapacityTerminationPolicy) {
        self.policy = policy;
    }

    pub fn target_capacity(&self) -> u32 {
        self.target_capacity
    }

    pub fn set_target_capacity(&mut self, target: u32) {
        self.target_capacity = target;
    }

    pub fn state(&self) -> FleetRequestState {
        self.state
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn instances(&self) -> &[ActiveInstance] {
        &self.instances
    }

    pub fn instance_ids(&self) -> Vec<String> {
        self.instances.iter().map(|i| i.instance_id.clone()).collect()
    }

    /// Sum of the weighted capacities of all active instances.
    pub fn fulfilled_capacity(&self) -> f64 {
        self.instances.iter().map(|i| i.weighted_capacity).sum()
    }

    /// Fails unless the request is `active`.
    pub fn ensure_active(&self) -> FleetResult<()> {
        if self.state == FleetRequestState::Active {
            Ok(())
        } else {
            Err(FleetError::IncorrectState {
                id: self.id.clone(),
                state: self.state,
            })
        }
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn transition(&mut self, next: FleetRequestState) -> FleetResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(FleetError::IncorrectState {
                id: self.id.clone(),
                state: self.state,
            });
        }
        debug!(fleet_id = %self.id, from = %self.state, to = %next, "fleet request state change");
        self.state = next;
        Ok(())
    }

    /// Record one allocation round's worth of launched instances.
    ///
    /// `launched` pairs each handle with the pool entry it came from.
    pub fn record_round(&mut self, launched: Vec<(&PoolEntry, InstanceHandle)>) {
        if launched.is_empty() {
            return;
        }
        let round = self.next_round;
        self.next_round += 1;

        for (entry, handle) in launched {
            let sequence = self.next_sequence;
            self.next_sequence += 1;
            self.instances.push(ActiveInstance {
                instance_id: handle.instance_id,
                instance_type: handle.instance_type,
                subnet_id: handle.subnet_id,
                availability_zone: handle.availability_zone,
                launch_spec_index: entry.index,
                weighted_capacity: entry.weighted_capacity,
                allocation_round: round,
                sequence,
            });
        }
    }

    /// Drop the given instances from the active set. Returns how many
    /// were removed.
    pub fn remove_instances(&mut self, instance_ids: &[String]) -> usize {
        let before = self.instances.len();
        self.instances.retain(|i| !instance_ids.contains(&i.instance_id));
        before - self.instances.len()
    }

    /// Keep only instances for which `is_running` holds. Returns the ids
    /// that were dropped.
    pub fn retain_running(&mut self, mut is_running: impl FnMut(&str) -> bool) -> Vec<String> {
        let mut dropped = Vec::new();
        self.instances.retain(|i| {
            let keep = is_running(&i.instance_id);
            if !keep {
                dropped.push(i.instance_id.clone());
            }
            keep
        });
        dropped
    }

    /// Instances to terminate so fulfilled capacity comes down toward
    /// `new_target` without dropping below it.
    ///
    /// Candidates are ordered by the most recent allocation round their
    /// launch specification took part in (newest first), then by launch
    /// order (newest first). Selection stops at the first candidate whose
    /// removal would leave less than `new_target`.
    pub fn select_victims(&self, new_target: u32) -> Vec<String> {
        let target = f64::from(new_target);

        let mut latest_round: HashMap<usize, u64> = HashMap::new();
        for inst in &self.instances {
            let round = latest_round.entry(inst.launch_spec_index).or_insert(0);
            *round = (*round).max(inst.allocation_round);
        }

        let mut candidates: Vec<&ActiveInstance> = self.instances.iter().collect();
        candidates.sort_by(|a, b| {
            let ra = latest_round[&a.launch_spec_index];
            let rb = latest_round[&b.launch_spec_index];
            rb.cmp(&ra).then(b.sequence.cmp(&a.sequence))
        });

        let mut remaining = self.fulfilled_capacity();
        let mut victims = Vec::new();
        for inst in candidates {
            if remaining - inst.weighted_capacity < target - EPSILON {
                break;
            }
            remaining -= inst.weighted_capacity;
            victims.push(inst.instance_id.clone());
        }
        victims
    }

    /// Work out the outcome of a cancellation without applying it.
    pub fn plan_cancel(&self, terminate_instances: bool) -> CancelPlan {
        let previous = self.state;

        let (next, terminate) = if self.instances.is_empty() && self.target_capacity == 0 {
            (FleetRequestState::Cancelled, Vec::new())
        } else if terminate_instances {
            (FleetRequestState::Cancelled, self.instance_ids())
        } else {
            (FleetRequestState::CancelledRunning, Vec::new())
        };

        CancelPlan {
            previous,
            next,
            terminate,
        }
    }

    /// Capture a describable view of the request.
    pub fn snapshot(&self) -> FleetRequestSnapshot {
        let mut config = self.config.clone();
        config.target_capacity = i64::from(self.target_capacity);
        if config.allocation_strategy.is_none() {
            config.allocation_strategy = Some(self.strategy.as_str().to_string());
        }
        config.excess_capacity_termination_policy = Some(self.policy.as_str().to_string());

        FleetRequestSnapshot {
            spot_fleet_request_id: self.id.clone(),
            spot_fleet_request_state: self.state,
            create_time: self.created_at,
            target_capacity: self.target_capacity,
            fulfilled_capacity: self.fulfilled_capacity(),
            allocation_strategy: self.strategy,
            excess_capacity_termination_policy: self.policy,
            spot_fleet_request_config: config,
            launch_spec_pool: self.pool.entries().to_vec(),
        }
    }
}

/// Point-in-time view of a fleet request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FleetRequestSnapshot {
    pub spot_fleet_request_id: String,
    pub spot_fleet_request_state: FleetRequestState,
    /// Unix timestamp (seconds).
    pub create_time: u64,
    pub target_capacity: u32,
    pub fulfilled_capacity: f64,
    pub allocation_strategy: AllocationStrategy,
    pub excess_capacity_termination_policy: ExcessCapacityTerminationPolicy,
    /// The submitted configuration with current target, strategy and
    /// termination policy filled in.
    pub spot_fleet_request_config: FleetRequestConfig,
    pub launch_spec_pool: Vec<PoolEntry>,
}
