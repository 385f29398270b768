//! Per-scope backends.
//!
//! Each `(account_id, region)` scope gets its own state store, simulated
//! compute service and fleet manager, created on first use. Scopes never
//! share mutable state.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use nimbus_core::{EmulatorConfig, IdGenerator, Scope};
use nimbus_state::StateStore;
use tracing::info;

use crate::compute::SimulatedCompute;
use crate::error::FleetResult;
use crate::manager::FleetManager;

/// Everything one scope needs.
pub struct FleetBackend {
    pub scope: Scope,
    pub store: StateStore,
    pub compute: Arc<SimulatedCompute>,
    pub fleets: FleetManager,
}

impl FleetBackend {
    /// A backend on redb's in-memory backend.
    pub fn in_memory(scope: Scope, config: &EmulatorConfig) -> FleetResult<Self> {
        let store = StateStore::open_in_memory()?;
        Self::with_store(scope, store, config)
    }

    pub fn with_store(scope: Scope, store: StateStore, config: &EmulatorConfig) -> FleetResult<Self> {
        let ids = Arc::new(IdGenerator::new(&config.emulator.id_seed, scope.clone()));
        let compute = Arc::new(SimulatedCompute::new(
            scope.clone(),
            store.clone(),
            ids.clone(),
            config.compute.clone(),
        )?);
        let fleets = FleetManager::new(compute.clone(), compute.clone(), ids, config.compute.clone());

        Ok(Self {
            scope,
            store,
            compute,
            fleets,
        })
    }
}

/// Lazily created backends keyed by scope.
pub struct BackendRegistry {
    config: EmulatorConfig,
    backends: RwLock<HashMap<Scope, Arc<FleetBackend>>>,
}

impl BackendRegistry {
    pub fn new(config: EmulatorConfig) -> Self {
        Self {
            config,
            backends: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    /// The backend for `scope`, creating it on first use.
    pub fn get(&self, scope: &Scope) -> FleetResult<Arc<FleetBackend>> {
        if let Some(backend) = self.backends.read().expect("backend registry lock").get(scope) {
            return Ok(backend.clone());
        }

        let mut backends = self.backends.write().expect("backend registry lock");
        if let Some(backend) = backends.get(scope) {
            return Ok(backend.clone());
        }
        let backend = Arc::new(FleetBackend::in_memory(scope.clone(), &self.config)?);
        backends.insert(scope.clone(), backend.clone());
        info!(%scope, "scope backend initialized");
        Ok(backend)
    }

    /// The backend for the configured default account and region.
    pub fn default_backend(&self) -> FleetResult<Arc<FleetBackend>> {
        self.get(&self.config.default_scope())
    }

    /// Scopes initialized so far, sorted.
    pub fn scopes(&self) -> Vec<Scope> {
        let mut scopes: Vec<Scope> = self
            .backends
            .read()
            .expect("backend registry lock")
            .keys()
            .cloned()
            .collect();
        scopes.sort();
        scopes
    }
}
