//! Launch specification pool — the normalized candidates a fleet draws from.
//!
//! A pool is built once per fleet request from its inline launch
//! specifications followed by its launch template configurations (one
//! entry per override, or one entry for a template without overrides).
//! After construction the pool is immutable and cheap to clone.

use std::sync::Arc;

use nimbus_core::config::ComputeConfig;
use serde::Serialize;
use tracing::debug;

use crate::error::{FleetError, FleetResult};
use crate::provider::LaunchTemplateResolver;
use crate::types::{
    FleetRequestConfig, LaunchSpecification, LaunchTemplateOverrides, TemplateVersion, parse_price,
};

/// One allocatable candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PoolEntry {
    /// Position in the pool; also the tie-break order.
    pub index: usize,
    pub instance_type: String,
    pub weighted_capacity: f64,
    /// Effective unit price. `None` when neither the specification nor the
    /// on-demand price table knows one.
    pub price: Option<f64>,
    /// The resource template instances are launched from.
    pub spec: LaunchSpecification,
}

/// An immutable, non-empty, ordered set of pool entries.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpecPool {
    entries: Arc<[PoolEntry]>,
}

impl LaunchSpecPool {
    /// Build the pool for a fleet configuration.
    ///
    /// Template references are resolved through `resolver`; an unknown
    /// template aborts the build. Entries without an explicit price take
    /// the on-demand price for their instance type from `prices`.
    pub fn build(
        config: &FleetRequestConfig,
        resolver: &dyn LaunchTemplateResolver,
        prices: &ComputeConfig,
    ) -> FleetResult<Self> {
        let mut specs: Vec<LaunchSpecification> = config.launch_specifications.clone();

        for template_config in &config.launch_template_configs {
            let lt_spec = &template_config.launch_template_specification;
            let reference = lt_spec.reference()?;
            let version = TemplateVersion::parse(lt_spec.version.as_deref())?;
            let base = resolver.resolve(&reference, version)?;

            if template_config.overrides.is_empty() {
                specs.push(base);
            } else {
                specs.extend(
                    template_config
                        .overrides
                        .iter()
                        .map(|o| apply_override(&base, o)),
                );
            }
            debug!(template = %reference, overrides = template_config.overrides.len(), "launch template resolved");
        }

        let entries = specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| to_entry(index, spec, prices))
            .collect::<FleetResult<Vec<_>>>()?;

        Self::from_entries(entries)
    }

    /// Wrap pre-built entries. Fails on an empty list.
    pub fn from_entries(entries: Vec<PoolEntry>) -> FleetResult<Self> {
        if entries.is_empty() {
            return Err(FleetError::Configuration(
                "no launch specifications could be resolved".to_string(),
            ));
        }
        Ok(Self {
            entries: entries.into(),
        })
    }

    pub fn entries(&self) -> &[PoolEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&PoolEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn apply_override(base: &LaunchSpecification, o: &LaunchTemplateOverrides) -> LaunchSpecification {
    let mut spec = base.clone();
    if let Some(instance_type) = &o.instance_type {
        spec.instance_type = instance_type.clone();
    }
    if let Some(subnet_id) = &o.subnet_id {
        spec.subnet_id = Some(subnet_id.clone());
    }
    if let Some(az) = &o.availability_zone {
        spec.availability_zone = Some(az.clone());
    }
    if let Some(weight) = o.weighted_capacity {
        spec.weighted_capacity = weight;
    }
    if let Some(price) = &o.spot_price {
        spec.spot_price = Some(price.clone());
    }
    spec
}

fn to_entry(index: usize, spec: LaunchSpecification, prices: &ComputeConfig) -> FleetResult<PoolEntry> {
    if spec.instance_type.trim().is_empty() {
        return Err(FleetError::Configuration(format!(
            "launch specification {index} has no instance type"
        )));
    }

    let weight = spec.weighted_capacity;
    if !weight.is_finite() || weight <= 0.0 {
        return Err(FleetError::invalid(
            "WeightedCapacity",
            format!("{weight} must be a positive number"),
        ));
    }

    let price = match &spec.spot_price {
        Some(raw) => Some(parse_price("SpotPrice", raw)?),
        None => prices.on_demand_price(&spec.instance_type),
    };

    Ok(PoolEntry {
        index,
        instance_type: spec.instance_type.clone(),
        weighted_capacity: weight,
        price,
        spec,
    })
}
