//! Domain types for the Nimbus state store.
//!
//! These types represent the persisted state of simulated compute
//! instances and launch templates. All types are serializable to/from
//! JSON for storage in redb tables.

use nimbus_core::{Tag, TagSpecification};
use serde::{Deserialize, Serialize};

/// Unique identifier for a compute instance (`i-…`).
pub type InstanceId = String;

/// Unique identifier for a launch template (`lt-…`).
pub type LaunchTemplateId = String;

// ── Instance ──────────────────────────────────────────────────────

/// A simulated compute instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceRecord {
    pub id: InstanceId,
    pub instance_type: String,
    pub image_id: Option<String>,
    pub key_name: Option<String>,
    pub subnet_id: Option<String>,
    pub availability_zone: String,
    pub security_group_ids: Vec<String>,
    pub tags: Vec<Tag>,
    pub status: InstanceStatus,
    /// Position in the scope-wide launch order.
    pub launch_index: u64,
    /// Unix timestamp (seconds) when the instance was launched.
    pub launched_at: u64,
    /// Unix timestamp (seconds) when the instance was terminated.
    pub terminated_at: Option<u64>,
}

impl InstanceRecord {
    pub fn table_key(&self) -> &str {
        &self.id
    }

    pub fn is_running(&self) -> bool {
        self.status == InstanceStatus::Running
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }
}

/// Lifecycle status of a simulated instance.
///
/// Instances start running immediately; there is no pending phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Running,
    Terminated,
}

// ── Launch template ───────────────────────────────────────────────

/// A named, versioned instance template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LaunchTemplate {
    pub id: LaunchTemplateId,
    pub name: String,
    /// Version numbers start at 1; `versions[n - 1]` is version `n`.
    pub versions: Vec<LaunchTemplateData>,
    pub default_version: u32,
    pub created_at: u64,
}

impl LaunchTemplate {
    pub fn table_key(&self) -> &str {
        &self.id
    }

    pub fn latest_version(&self) -> u32 {
        self.versions.len() as u32
    }

    /// Template data for a version number, if it exists.
    pub fn version(&self, number: u32) -> Option<&LaunchTemplateData> {
        let idx = number.checked_sub(1)? as usize;
        self.versions.get(idx)
    }
}

/// The instance parameters a launch template version carries.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct LaunchTemplateData {
    pub image_id: Option<String>,
    pub instance_type: Option<String>,
    pub key_name: Option<String>,
    pub subnet_id: Option<String>,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    pub user_data: Option<String>,
    #[serde(default)]
    pub disable_api_termination: bool,
    #[serde(default)]
    pub tag_specifications: Vec<TagSpecification>,
}
