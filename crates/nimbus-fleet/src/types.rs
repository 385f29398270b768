//! Wire-level fleet request types.
//!
//! `FleetRequestConfig` and friends mirror the request document a client
//! submits. Free-form fields (prices, enum spellings, target capacity) are
//! kept exactly as submitted so they can be echoed back by describe calls;
//! they are validated into typed values when a request is created.

use std::fmt;
use std::str::FromStr;

use nimbus_core::TagSpecification;
use serde::{Deserialize, Serialize};

use crate::error::{FleetError, FleetResult};

/// Tag key stamped on every instance a fleet request provisions.
pub const FLEET_REQUEST_ID_TAG: &str = "aws:ec2spot:fleet-request-id";

// ── Fleet request configuration ───────────────────────────────────

/// A fleet request as submitted by a client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FleetRequestConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
    /// Fleet-wide maximum price, as a decimal string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spot_price: Option<String>,
    pub target_capacity: i64,
    #[serde(default)]
    pub iam_fleet_role: String,
    /// `lowestPrice`, `lowestCost` or `diversified`; defaults to `lowestPrice`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation_strategy: Option<String>,
    /// `default` or `noTermination`; defaults to `default`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excess_capacity_termination_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub launch_specifications: Vec<LaunchSpecification>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub launch_template_configs: Vec<LaunchTemplateConfig>,
}

/// An inline launch specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LaunchSpecification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(default)]
    pub instance_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_groups: Vec<GroupIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam_instance_profile: Option<IamInstanceProfile>,
    #[serde(default)]
    pub ebs_optimized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring: Option<Monitoring>,
    /// Opaque block device mappings, passed through untouched.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub block_device_mappings: Vec<serde_json::Value>,
    #[serde(default = "default_weighted_capacity")]
    pub weighted_capacity: f64,
    /// Per-unit price, as a decimal string. Absent means on-demand.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spot_price: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag_specifications: Vec<TagSpecification>,
}

fn default_weighted_capacity() -> f64 {
    1.0
}

impl LaunchSpecification {
    /// A bare specification for the given instance type.
    pub fn new(instance_type: &str) -> Self {
        Self {
            image_id: None,
            instance_type: instance_type.to_string(),
            key_name: None,
            security_groups: Vec::new(),
            user_data: None,
            subnet_id: None,
            availability_zone: None,
            iam_instance_profile: None,
            ebs_optimized: false,
            monitoring: None,
            block_device_mappings: Vec::new(),
            weighted_capacity: default_weighted_capacity(),
            spot_price: None,
            tag_specifications: Vec::new(),
        }
    }

    pub fn with_weight(mut self, weighted_capacity: f64) -> Self {
        self.weighted_capacity = weighted_capacity;
        self
    }

    pub fn with_price(mut self, spot_price: &str) -> Self {
        self.spot_price = Some(spot_price.to_string());
        self
    }

    pub fn with_subnet(mut self, subnet_id: &str) -> Self {
        self.subnet_id = Some(subnet_id.to_string());
        self
    }

    pub fn security_group_ids(&self) -> Vec<String> {
        self.security_groups.iter().map(|g| g.group_id.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupIdentifier {
    pub group_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IamInstanceProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Monitoring {
    pub enabled: bool,
}

// ── Launch template configuration ─────────────────────────────────

/// A launch template reference plus optional per-entry overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LaunchTemplateConfig {
    pub launch_template_specification: FleetLaunchTemplateSpecification,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<LaunchTemplateOverrides>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FleetLaunchTemplateSpecification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_template_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_template_name: Option<String>,
    /// `$Latest`, `$Default`, or a version number. Absent means `$Default`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl FleetLaunchTemplateSpecification {
    /// The template this specification points at. The id wins when both
    /// an id and a name are given.
    pub fn reference(&self) -> FleetResult<LaunchTemplateReference> {
        match (&self.launch_template_id, &self.launch_template_name) {
            (Some(id), _) => Ok(LaunchTemplateReference::Id(id.clone())),
            (None, Some(name)) => Ok(LaunchTemplateReference::Name(name.clone())),
            (None, None) => Err(FleetError::invalid(
                "LaunchTemplateSpecification",
                "either LaunchTemplateId or LaunchTemplateName is required",
            )),
        }
    }
}

/// Fields that replace the template's values for one pool entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LaunchTemplateOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weighted_capacity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spot_price: Option<String>,
}

/// How a launch template is named.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LaunchTemplateReference {
    Id(String),
    Name(String),
}

impl fmt::Display for LaunchTemplateReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchTemplateReference::Id(id) => write!(f, "{id}"),
            LaunchTemplateReference::Name(name) => write!(f, "{name}"),
        }
    }
}

/// Which version of a launch template to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateVersion {
    Default,
    Latest,
    Number(u32),
}

impl TemplateVersion {
    pub fn parse(raw: Option<&str>) -> FleetResult<Self> {
        match raw {
            None | Some("$Default") => Ok(TemplateVersion::Default),
            Some("$Latest") => Ok(TemplateVersion::Latest),
            Some(other) => other
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .map(TemplateVersion::Number)
                .ok_or_else(|| FleetError::invalid("Version", format!("unrecognized version '{other}'"))),
        }
    }
}

// ── Enums ─────────────────────────────────────────────────────────

/// Policy choosing which launch specifications satisfy capacity demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AllocationStrategy {
    #[default]
    LowestPrice,
    /// Same ordering as `LowestPrice`; kept distinct to echo the spelling.
    LowestCost,
    Diversified,
}

impl AllocationStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            AllocationStrategy::LowestPrice => "lowestPrice",
            AllocationStrategy::LowestCost => "lowestCost",
            AllocationStrategy::Diversified => "diversified",
        }
    }

    pub fn is_cost_minimizing(self) -> bool {
        matches!(self, AllocationStrategy::LowestPrice | AllocationStrategy::LowestCost)
    }
}

impl FromStr for AllocationStrategy {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lowestPrice" | "lowest-price" => Ok(AllocationStrategy::LowestPrice),
            "lowestCost" | "lowest-cost" => Ok(AllocationStrategy::LowestCost),
            "diversified" => Ok(AllocationStrategy::Diversified),
            other => Err(FleetError::invalid(
                "AllocationStrategy",
                format!("unrecognized value '{other}'"),
            )),
        }
    }
}

impl fmt::Display for AllocationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether shrinking a fleet's target terminates instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExcessCapacityTerminationPolicy {
    #[default]
    Default,
    NoTermination,
}

impl ExcessCapacityTerminationPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ExcessCapacityTerminationPolicy::Default => "default",
            ExcessCapacityTerminationPolicy::NoTermination => "noTermination",
        }
    }
}

impl FromStr for ExcessCapacityTerminationPolicy {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" | "Default" => Ok(ExcessCapacityTerminationPolicy::Default),
            "noTermination" | "NoTermination" => Ok(ExcessCapacityTerminationPolicy::NoTermination),
            other => Err(FleetError::invalid(
                "ExcessCapacityTerminationPolicy",
                format!("unrecognized value '{other}'"),
            )),
        }
    }
}

impl fmt::Display for ExcessCapacityTerminationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Validation helpers ────────────────────────────────────────────

/// Parse a decimal price string. Negative, non-finite or malformed
/// prices are rejected.
pub fn parse_price(field: &str, raw: &str) -> FleetResult<f64> {
    let price: f64 = raw
        .trim()
        .parse()
        .map_err(|_| FleetError::invalid(field, format!("'{raw}' is not a decimal price")))?;
    if !price.is_finite() || price < 0.0 {
        return Err(FleetError::invalid(field, format!("'{raw}' must be a non-negative price")));
    }
    Ok(price)
}

/// Validate a requested target capacity.
pub fn parse_target_capacity(raw: i64) -> FleetResult<u32> {
    u32::try_from(raw).map_err(|_| {
        FleetError::invalid(
            "TargetCapacity",
            format!("{raw} is out of range, expected 0..={}", u32::MAX),
        )
    })
}
