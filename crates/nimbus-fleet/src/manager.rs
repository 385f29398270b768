//! Fleet manager — creation, capacity modification and cancellation.
//!
//! The manager owns every fleet request of one scope. It decides *what*
//! to launch or terminate (through [`allocate`] and victim selection) and
//! asks the [`InstanceProvisioner`] to do it. All mutations go through a
//! single registry lock, so operations on the same request never
//! interleave.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use nimbus_core::config::ComputeConfig;
use nimbus_core::{IdGenerator, ResourceKind, Tag};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::allocation::{EPSILON, allocate};
use crate::error::{FleetError, FleetResult};
use crate::pool::{LaunchSpecPool, PoolEntry};
use crate::provider::{InstanceHandle, InstanceProvisioner, LaunchTemplateResolver};
use crate::request::{
    ActiveInstance, CancelPlan, FleetRequest, FleetRequestSnapshot, FleetRequestState,
};
use crate::types::{
    AllocationStrategy, ExcessCapacityTerminationPolicy, FLEET_REQUEST_ID_TAG, FleetRequestConfig,
    parse_price, parse_target_capacity,
};

/// Outcome of cancelling one fleet request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CancelledFleetRequest {
    pub spot_fleet_request_id: String,
    pub previous_state: FleetRequestState,
    pub current_state: FleetRequestState,
}

#[derive(Default)]
struct Registry {
    requests: HashMap<String, FleetRequest>,
    /// Listable request ids in creation order.
    order: Vec<String>,
    /// Fully cancelled request ids.
    cancelled: HashSet<String>,
}

pub struct FleetManager {
    provisioner: Arc<dyn InstanceProvisioner>,
    resolver: Arc<dyn LaunchTemplateResolver>,
    ids: Arc<IdGenerator>,
    compute: ComputeConfig,
    registry: RwLock<Registry>,
}

impl FleetManager {
    pub fn new(
        provisioner: Arc<dyn InstanceProvisioner>,
        resolver: Arc<dyn LaunchTemplateResolver>,
        ids: Arc<IdGenerator>,
        compute: ComputeConfig,
    ) -> Self {
        Self {
            provisioner,
            resolver,
            ids,
            compute,
            registry: RwLock::new(Registry::default()),
        }
    }

    // ── Create ─────────────────────────────────────────────────────

    /// Validate `config`, launch enough instances to cover its target
    /// capacity and register the request. Returns the new request id.
    pub fn create_fleet_request(&self, config: FleetRequestConfig) -> FleetResult<String> {
        let target = parse_target_capacity(config.target_capacity)?;
        let strategy: AllocationStrategy = match config.allocation_strategy.as_deref() {
            Some(raw) => raw.parse()?,
            None => AllocationStrategy::default(),
        };
        let policy: ExcessCapacityTerminationPolicy =
            match config.excess_capacity_termination_policy.as_deref() {
                Some(raw) => raw.parse()?,
                None => ExcessCapacityTerminationPolicy::default(),
            };
        if let Some(price) = &config.spot_price {
            parse_price("SpotPrice", price)?;
        }

        let pool = LaunchSpecPool::build(&config, self.resolver.as_ref(), &self.compute)?;
        let id = self.ids.next(ResourceKind::FleetRequest);
        let mut request = FleetRequest::new(
            id.clone(),
            config,
            pool,
            strategy,
            policy,
            target,
            epoch_secs(),
        );

        let launched = self.provision(&mut request, f64::from(target))?;

        let mut registry = self.registry.write().expect("fleet registry lock");
        registry.order.push(id.clone());
        registry.requests.insert(id.clone(), request);

        info!(
            fleet_id = %id,
            target,
            %strategy,
            launched,
            "fleet request created"
        );
        Ok(id)
    }

    // ── Describe ───────────────────────────────────────────────────

    /// Snapshots of listable requests in creation order.
    ///
    /// With `ids`, only those requests are returned; unknown and fully
    /// cancelled ids are skipped.
    pub fn describe_fleet_requests(
        &self,
        ids: Option<&[String]>,
    ) -> FleetResult<Vec<FleetRequestSnapshot>> {
        let mut guard = self.registry.write().expect("fleet registry lock");
        let registry = &mut *guard;

        let mut snapshots = Vec::new();
        for id in &registry.order {
            if ids.is_some_and(|wanted| !wanted.contains(id)) {
                continue;
            }
            let Some(request) = registry.requests.get_mut(id) else {
                continue;
            };
            if !request.state().is_listable() {
                continue;
            }
            self.reconcile(request)?;
            snapshots.push(request.snapshot());
        }
        Ok(snapshots)
    }

    /// Active instances of a request in provisioning order.
    ///
    /// A fully cancelled request has none.
    pub fn describe_fleet_instances(&self, id: &str) -> FleetResult<Vec<ActiveInstance>> {
        let mut registry = self.registry.write().expect("fleet registry lock");
        if registry.cancelled.contains(id) {
            return Ok(Vec::new());
        }
        let request = registry
            .requests
            .get_mut(id)
            .ok_or_else(|| FleetError::FleetRequestNotFound(id.to_string()))?;
        self.reconcile(request)?;
        Ok(request.instances().to_vec())
    }

    // ── Modify ─────────────────────────────────────────────────────

    /// Move an active request to `new_target`.
    ///
    /// Growth launches enough instances to cover the gap between fulfilled
    /// capacity and the new target. Shrinking terminates victims unless
    /// the effective policy is `noTermination`, in which case only the
    /// recorded target changes. A given `policy` replaces the request's.
    pub fn modify_fleet_request(
        &self,
        id: &str,
        new_target: i64,
        policy: Option<ExcessCapacityTerminationPolicy>,
    ) -> FleetResult<()> {
        let target = parse_target_capacity(new_target)?;

        let mut registry = self.registry.write().expect("fleet registry lock");
        if registry.cancelled.contains(id) {
            return Err(FleetError::IncorrectState {
                id: id.to_string(),
                state: FleetRequestState::Cancelled,
            });
        }
        let request = registry
            .requests
            .get_mut(id)
            .ok_or_else(|| FleetError::FleetRequestNotFound(id.to_string()))?;
        request.ensure_active()?;
        self.reconcile(request)?;

        let effective_policy = policy.unwrap_or(request.policy());
        let fulfilled = request.fulfilled_capacity();
        let wanted = f64::from(target);

        if wanted > fulfilled + EPSILON {
            let launched = self.provision(request, wanted - fulfilled)?;
            debug!(fleet_id = %id, launched, "fleet grown");
        } else if wanted < fulfilled - EPSILON
            && effective_policy == ExcessCapacityTerminationPolicy::Default
        {
            let victims = request.select_victims(target);
            if !victims.is_empty() {
                debug!(fleet_id = %id, victims = victims.len(), "victims selected");
                self.provisioner.terminate_instances(&victims)?;
                request.remove_instances(&victims);
            }
        }

        request.set_target_capacity(target);
        if let Some(policy) = policy {
            request.set_policy(policy);
        }

        info!(
            fleet_id = %id,
            target,
            fulfilled = request.fulfilled_capacity(),
            policy = %effective_policy,
            "fleet request modified"
        );
        Ok(())
    }

    // ── Cancel ─────────────────────────────────────────────────────

    /// Cancel the given requests.
    ///
    /// Every id is checked and planned before anything changes; an id that
    /// never existed fails the whole call. Instances are terminated in one
    /// batch before any request changes state, so a failed termination
    /// leaves every request as it was. Cancelling a fully cancelled
    /// request again reports `cancelled → cancelled`.
    pub fn cancel_fleet_requests(
        &self,
        ids: &[String],
        terminate_instances: bool,
    ) -> FleetResult<Vec<CancelledFleetRequest>> {
        let mut guard = self.registry.write().expect("fleet registry lock");
        let registry = &mut *guard;

        if let Some(unknown) = ids
            .iter()
            .find(|id| !registry.requests.contains_key(*id) && !registry.cancelled.contains(*id))
        {
            return Err(FleetError::FleetRequestNotFound(unknown.clone()));
        }

        let mut seen = HashSet::new();
        let mut plans: Vec<(&String, Option<CancelPlan>)> = Vec::new();
        for id in ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            let Some(request) = registry.requests.get_mut(id) else {
                plans.push((id, None));
                continue;
            };
            self.reconcile(request)?;
            let plan = request.plan_cancel(terminate_instances);
            if !plan.is_legal() {
                return Err(FleetError::IncorrectState {
                    id: id.clone(),
                    state: plan.previous,
                });
            }
            plans.push((id, Some(plan)));
        }

        let doomed: Vec<String> = plans
            .iter()
            .filter_map(|(_, plan)| plan.as_ref())
            .flat_map(|plan| plan.terminate.iter().cloned())
            .collect();
        if !doomed.is_empty() {
            self.provisioner.terminate_instances(&doomed)?;
        }

        let mut results = Vec::with_capacity(plans.len());
        for (id, plan) in plans {
            let Some(plan) = plan else {
                results.push(CancelledFleetRequest {
                    spot_fleet_request_id: id.clone(),
                    previous_state: FleetRequestState::Cancelled,
                    current_state: FleetRequestState::Cancelled,
                });
                continue;
            };

            if let Some(request) = registry.requests.get_mut(id) {
                request.remove_instances(&plan.terminate);
                for state in plan.path() {
                    request.transition(state)?;
                }
            }
            if plan.next == FleetRequestState::Cancelled {
                registry.requests.remove(id);
                registry.order.retain(|o| o != id);
                registry.cancelled.insert(id.clone());
            }

            info!(
                fleet_id = %id,
                from = %plan.previous,
                to = %plan.next,
                terminated = plan.terminate.len(),
                "fleet request cancelled"
            );
            results.push(CancelledFleetRequest {
                spot_fleet_request_id: id.clone(),
                previous_state: plan.previous,
                current_state: plan.next,
            });
        }
        Ok(results)
    }

    // ── Internals ──────────────────────────────────────────────────

    /// Allocate `capacity` from the request's pool and launch it.
    ///
    /// On failure, instances already launched in this round are
    /// terminated again and the request is left untouched.
    fn provision(&self, request: &mut FleetRequest, capacity: f64) -> FleetResult<usize> {
        let pool = request.pool().clone();
        let allocation = allocate(&pool, capacity, request.strategy())?;
        if allocation.is_empty() {
            return Ok(0);
        }

        let tags = [Tag::new(FLEET_REQUEST_ID_TAG, request.id())];
        let mut launched: Vec<(&PoolEntry, InstanceHandle)> = Vec::new();

        for item in allocation.items() {
            let result = match pool.get(item.entry) {
                Some(entry) => self
                    .provisioner
                    .create_instances(&entry.spec, item.units, &tags)
                    .map(|handles| (entry, handles)),
                None => Err(FleetError::Configuration(format!(
                    "allocation references missing pool entry {}",
                    item.entry
                ))),
            };

            match result {
                Ok((entry, handles)) => {
                    launched.extend(handles.into_iter().map(|h| (entry, h)));
                }
                Err(err) => {
                    self.roll_back(request.id(), &launched);
                    return Err(err);
                }
            }
        }

        let count = launched.len();
        debug!(
            fleet_id = %request.id(),
            instances = count,
            capacity = allocation.total_weight(),
            "allocation provisioned"
        );
        request.record_round(launched);
        Ok(count)
    }

    fn roll_back(&self, fleet_id: &str, launched: &[(&PoolEntry, InstanceHandle)]) {
        if launched.is_empty() {
            return;
        }
        let ids: Vec<String> = launched.iter().map(|(_, h)| h.instance_id.clone()).collect();
        warn!(fleet_id, count = ids.len(), "provisioning failed, terminating launched instances");
        if let Err(err) = self.provisioner.terminate_instances(&ids) {
            warn!(fleet_id, error = %err, "rollback termination failed");
        }
    }

    /// Drop instances compute no longer reports as running.
    fn reconcile(&self, request: &mut FleetRequest) -> FleetResult<()> {
        if request.instances().is_empty() {
            return Ok(());
        }
        let running = self.provisioner.running_instances(&request.instance_ids())?;
        let dropped = request.retain_running(|id| running.contains(id));
        if !dropped.is_empty() {
            info!(
                fleet_id = %request.id(),
                dropped = dropped.len(),
                fulfilled = request.fulfilled_capacity(),
                "externally terminated instances dropped"
            );
        }
        Ok(())
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
