//! Collaborator seams the fleet core calls out to.
//!
//! The fleet manager never creates or destroys instances itself; it asks
//! an [`InstanceProvisioner`] to, and it resolves launch template
//! references through a [`LaunchTemplateResolver`]. Both are scoped to a
//! single account/region, so neither takes a region argument.

use std::collections::HashSet;

use nimbus_core::Tag;
use serde::{Deserialize, Serialize};

use crate::error::FleetResult;
use crate::types::{LaunchSpecification, LaunchTemplateReference, TemplateVersion};

/// A provisioned (or just-terminated) instance as reported by compute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceHandle {
    pub instance_id: String,
    pub instance_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    pub availability_zone: String,
}

/// Creates, terminates and reports on instances.
pub trait InstanceProvisioner: Send + Sync {
    /// Launch `count` instances from `spec`, applying `tags` to each.
    ///
    /// Either all `count` instances are created or none are.
    fn create_instances(
        &self,
        spec: &LaunchSpecification,
        count: u32,
        tags: &[Tag],
    ) -> FleetResult<Vec<InstanceHandle>>;

    /// Terminate the given instances. Returns the ones that were running.
    fn terminate_instances(&self, instance_ids: &[String]) -> FleetResult<Vec<InstanceHandle>>;

    /// The subset of `instance_ids` that is still running.
    fn running_instances(&self, instance_ids: &[String]) -> FleetResult<HashSet<String>>;
}

/// Turns a launch template reference into a launch specification.
pub trait LaunchTemplateResolver: Send + Sync {
    /// Fails with a not-found error when the template or version is unknown.
    fn resolve(
        &self,
        reference: &LaunchTemplateReference,
        version: TemplateVersion,
    ) -> FleetResult<LaunchSpecification>;
}
