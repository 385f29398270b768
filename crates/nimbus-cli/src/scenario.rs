//! Scenario replay.
//!
//! A scenario is a JSON document with a list of steps. Each step calls one
//! emulator operation; ids it creates can be given an alias and referred
//! to by that alias in later steps.
//!
//! ```json
//! {
//!   "name": "grow and cancel",
//!   "steps": [
//!     { "action": "request_fleet", "alias": "fleet", "config": { "TargetCapacity": 6, ... } },
//!     { "action": "modify_fleet", "fleet": "fleet", "target_capacity": 20 },
//!     { "action": "cancel_fleets", "fleets": ["fleet"], "terminate_instances": true }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use nimbus_core::{EmulatorConfig, Scope};
use nimbus_fleet::{
    BackendRegistry, ErrorKind, ExcessCapacityTerminationPolicy, FleetBackend, FleetError,
    FleetRequestConfig,
};
use nimbus_state::LaunchTemplateData;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

// ── Scenario document ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
pub struct Step {
    /// Region to run in; the configured region when absent.
    #[serde(default)]
    pub region: Option<String>,
    /// Error code the step must fail with.
    #[serde(default)]
    pub expect_error: Option<String>,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    CreateLaunchTemplate {
        name: String,
        #[serde(default)]
        data: LaunchTemplateData,
        #[serde(default)]
        alias: Option<String>,
    },
    RequestFleet {
        config: FleetRequestConfig,
        #[serde(default)]
        alias: Option<String>,
    },
    ModifyFleet {
        fleet: String,
        target_capacity: i64,
        #[serde(default)]
        excess_capacity_termination_policy: Option<String>,
    },
    CancelFleets {
        fleets: Vec<String>,
        #[serde(default)]
        terminate_instances: bool,
    },
    DescribeFleets {
        #[serde(default)]
        fleets: Option<Vec<String>>,
    },
    DescribeFleetInstances {
        fleet: String,
    },
    /// Terminate instances outside of any fleet operation. `fleet` plus
    /// `count` picks the first `count` active instances of that fleet.
    TerminateInstances {
        #[serde(default)]
        instance_ids: Vec<String>,
        #[serde(default)]
        fleet: Option<String>,
        #[serde(default)]
        count: Option<usize>,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::CreateLaunchTemplate { .. } => "create_launch_template",
            Action::RequestFleet { .. } => "request_fleet",
            Action::ModifyFleet { .. } => "modify_fleet",
            Action::CancelFleets { .. } => "cancel_fleets",
            Action::DescribeFleets { .. } => "describe_fleets",
            Action::DescribeFleetInstances { .. } => "describe_fleet_instances",
            Action::TerminateInstances { .. } => "terminate_instances",
        }
    }
}

// ── Report ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ScenarioReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub steps: Vec<StepReport>,
    /// Alias → generated id.
    pub aliases: BTreeMap<String, String>,
}

impl ScenarioReport {
    /// Steps that failed without declaring the failure as expected, plus
    /// steps that were expected to fail but did not.
    pub fn unexpected_failures(&self) -> usize {
        self.steps.iter().filter(|s| !s.as_expected).count()
    }
}

#[derive(Debug, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    pub as_expected: bool,
}

#[derive(Debug, Serialize)]
pub struct StepError {
    pub code: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl StepError {
    fn from_anyhow(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<FleetError>() {
            Some(fleet) => Self {
                code: fleet.code().to_string(),
                kind: fleet.kind(),
                message: fleet.to_string(),
            },
            None => Self {
                code: "InternalError".to_string(),
                kind: ErrorKind::Internal,
                message: format!("{err:#}"),
            },
        }
    }
}

// ── Runner ────────────────────────────────────────────────────────

pub struct ScenarioRunner {
    registry: BackendRegistry,
    aliases: BTreeMap<String, String>,
}

impl ScenarioRunner {
    pub fn new(config: EmulatorConfig) -> Self {
        Self {
            registry: BackendRegistry::new(config),
            aliases: BTreeMap::new(),
        }
    }

    /// Run every step in order. A failing step is recorded and the run
    /// carries on with the next one.
    pub fn run(&mut self, scenario: &Scenario) -> ScenarioReport {
        let mut steps = Vec::with_capacity(scenario.steps.len());

        for (index, step) in scenario.steps.iter().enumerate() {
            let action = step.action.name();
            let outcome = self.execute(step);

            let report = match outcome {
                Ok(result) => StepReport {
                    index,
                    action,
                    region: step.region.clone(),
                    result: Some(result),
                    error: None,
                    as_expected: step.expect_error.is_none(),
                },
                Err(err) => {
                    let error = StepError::from_anyhow(&err);
                    let as_expected = step.expect_error.as_deref() == Some(error.code.as_str());
                    if !as_expected {
                        warn!(index, action, code = %error.code, "scenario step failed");
                    }
                    StepReport {
                        index,
                        action,
                        region: step.region.clone(),
                        result: None,
                        error: Some(error),
                        as_expected,
                    }
                }
            };
            steps.push(report);
        }

        let report = ScenarioReport {
            name: scenario.name.clone(),
            steps,
            aliases: self.aliases.clone(),
        };
        info!(
            steps = report.steps.len(),
            failures = report.unexpected_failures(),
            scopes = self.registry.scopes().len(),
            "scenario finished"
        );
        report
    }

    fn backend(&self, step: &Step) -> anyhow::Result<Arc<FleetBackend>> {
        let config = self.registry.config();
        let scope = match &step.region {
            Some(region) => Scope::new(&config.emulator.account_id, region),
            None => config.default_scope(),
        };
        Ok(self.registry.get(&scope)?)
    }

    fn resolve(&self, name: &str) -> String {
        self.aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    fn remember(&mut self, alias: Option<&str>, id: &str) {
        if let Some(alias) = alias {
            self.aliases.insert(alias.to_string(), id.to_string());
        }
    }

    fn execute(&mut self, step: &Step) -> anyhow::Result<Value> {
        let backend = self.backend(step)?;

        match &step.action {
            Action::CreateLaunchTemplate { name, data, alias } => {
                let template = backend.compute.create_launch_template(name, data.clone())?;
                self.remember(alias.as_deref(), &template.id);
                Ok(json!({
                    "LaunchTemplateId": template.id,
                    "LaunchTemplateName": template.name,
                    "DefaultVersionNumber": template.default_version,
                    "LatestVersionNumber": template.latest_version(),
                }))
            }
            Action::RequestFleet { config, alias } => {
                let mut config = config.clone();
                for lt in &mut config.launch_template_configs {
                    let spec = &mut lt.launch_template_specification;
                    if let Some(id) = &spec.launch_template_id {
                        spec.launch_template_id = Some(self.resolve(id));
                    }
                }
                let id = backend.fleets.create_fleet_request(config)?;
                self.remember(alias.as_deref(), &id);
                Ok(json!({ "SpotFleetRequestId": id }))
            }
            Action::ModifyFleet {
                fleet,
                target_capacity,
                excess_capacity_termination_policy,
            } => {
                let policy = excess_capacity_termination_policy
                    .as_deref()
                    .map(str::parse::<ExcessCapacityTerminationPolicy>)
                    .transpose()?;
                backend
                    .fleets
                    .modify_fleet_request(&self.resolve(fleet), *target_capacity, policy)?;
                Ok(json!({ "Return": true }))
            }
            Action::CancelFleets {
                fleets,
                terminate_instances,
            } => {
                let ids: Vec<String> = fleets.iter().map(|f| self.resolve(f)).collect();
                let cancelled = backend
                    .fleets
                    .cancel_fleet_requests(&ids, *terminate_instances)?;
                Ok(json!({ "SuccessfulFleetRequests": cancelled }))
            }
            Action::DescribeFleets { fleets } => {
                let ids: Option<Vec<String>> = fleets
                    .as_ref()
                    .map(|fleets| fleets.iter().map(|f| self.resolve(f)).collect());
                let snapshots = backend.fleets.describe_fleet_requests(ids.as_deref())?;
                Ok(json!({ "SpotFleetRequestConfigs": snapshots }))
            }
            Action::DescribeFleetInstances { fleet } => {
                let id = self.resolve(fleet);
                let instances = backend.fleets.describe_fleet_instances(&id)?;
                Ok(json!({
                    "SpotFleetRequestId": id,
                    "ActiveInstances": instances,
                }))
            }
            Action::TerminateInstances {
                instance_ids,
                fleet,
                count,
            } => {
                let mut ids: Vec<String> = instance_ids.iter().map(|i| self.resolve(i)).collect();
                if let Some(fleet) = fleet {
                    let active = backend.fleets.describe_fleet_instances(&self.resolve(fleet))?;
                    let take = count.unwrap_or(active.len());
                    ids.extend(active.into_iter().take(take).map(|i| i.instance_id));
                }
                let terminated = backend.compute.terminate(&ids)?;
                let changes: Vec<Value> = terminated
                    .iter()
                    .map(|r| {
                        json!({
                            "InstanceId": r.id,
                            "PreviousState": "running",
                            "CurrentState": "terminated",
                        })
                    })
                    .collect();
                Ok(json!({ "TerminatingInstances": changes }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario(steps: Value) -> Scenario {
        serde_json::from_value(json!({ "name": "test", "steps": steps })).unwrap()
    }

    fn fleet_config(target: i64) -> Value {
        json!({
            "SpotPrice": "0.12",
            "TargetCapacity": target,
            "IamFleetRole": "arn:aws:iam::123456789012:role/fleet",
            "LaunchSpecifications": [
                { "InstanceType": "t2.small", "WeightedCapacity": 2.0, "SpotPrice": "0.13" },
                { "InstanceType": "t2.large", "WeightedCapacity": 4.0, "SpotPrice": "10.00" }
            ]
        })
    }

    #[test]
    fn test_full_lifecycle_with_aliases() {
        let scenario = scenario(json!([
            { "action": "request_fleet", "alias": "fleet", "config": fleet_config(6) },
            { "action": "modify_fleet", "fleet": "fleet", "target_capacity": 20 },
            { "action": "describe_fleet_instances", "fleet": "fleet" },
            { "action": "terminate_instances", "fleet": "fleet", "count": 2 },
            { "action": "describe_fleets", "fleets": ["fleet"] },
            { "action": "cancel_fleets", "fleets": ["fleet"], "terminate_instances": true },
            { "action": "describe_fleets" }
        ]));

        let mut runner = ScenarioRunner::new(EmulatorConfig::default());
        let report = runner.run(&scenario);

        assert_eq!(report.unexpected_failures(), 0);
        assert!(report.aliases["fleet"].starts_with("sfr-"));

        let instances = report.steps[2].result.as_ref().unwrap();
        assert_eq!(instances["ActiveInstances"].as_array().unwrap().len(), 10);

        let terminated = report.steps[3].result.as_ref().unwrap();
        assert_eq!(terminated["TerminatingInstances"].as_array().unwrap().len(), 2);

        let described = report.steps[4].result.as_ref().unwrap();
        assert_eq!(described["SpotFleetRequestConfigs"][0]["FulfilledCapacity"], 16.0);

        let cancelled = report.steps[5].result.as_ref().unwrap();
        assert_eq!(cancelled["SuccessfulFleetRequests"][0]["CurrentState"], "cancelled");

        let after = report.steps[6].result.as_ref().unwrap();
        assert!(after["SpotFleetRequestConfigs"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_launch_template_alias() {
        let scenario = scenario(json!([
            {
                "action": "create_launch_template",
                "name": "web",
                "alias": "web-lt",
                "data": { "ImageId": "ami-12c6146b", "InstanceType": "t2.medium" }
            },
            {
                "action": "request_fleet",
                "alias": "fleet",
                "config": {
                    "TargetCapacity": 2,
                    "LaunchTemplateConfigs": [{
                        "LaunchTemplateSpecification": { "LaunchTemplateId": "web-lt", "Version": "$Latest" },
                        "Overrides": [{ "InstanceType": "t2.nano", "SubnetId": "subnet-1" }]
                    }]
                }
            },
            { "action": "describe_fleet_instances", "fleet": "fleet" }
        ]));

        let mut runner = ScenarioRunner::new(EmulatorConfig::default());
        let report = runner.run(&scenario);

        assert_eq!(report.unexpected_failures(), 0);
        let instances = &report.steps[2].result.as_ref().unwrap()["ActiveInstances"];
        assert_eq!(instances.as_array().unwrap().len(), 2);
        assert_eq!(instances[0]["InstanceType"], "t2.nano");
        assert_eq!(instances[0]["SubnetId"], "subnet-1");
    }

    #[test]
    fn test_expected_and_unexpected_errors() {
        let scenario = scenario(json!([
            { "action": "modify_fleet", "fleet": "sfr-missing", "target_capacity": 1,
              "expect_error": "InvalidSpotFleetRequestId.NotFound" },
            { "action": "request_fleet", "config": fleet_config(-1) },
            { "action": "describe_fleets", "expect_error": "InvalidParameterValue" }
        ]));

        let mut runner = ScenarioRunner::new(EmulatorConfig::default());
        let report = runner.run(&scenario);

        assert!(report.steps[0].as_expected);
        assert!(!report.steps[1].as_expected);
        assert_eq!(report.steps[1].error.as_ref().unwrap().kind, ErrorKind::Validation);
        // Succeeded although a failure was expected.
        assert!(!report.steps[2].as_expected);
        assert_eq!(report.unexpected_failures(), 2);
    }

    #[test]
    fn test_regions_are_isolated() {
        let scenario = scenario(json!([
            { "action": "request_fleet", "alias": "east", "config": fleet_config(2) },
            { "action": "describe_fleets", "region": "eu-west-1" },
            { "action": "describe_fleets" }
        ]));

        let mut runner = ScenarioRunner::new(EmulatorConfig::default());
        let report = runner.run(&scenario);

        let west = &report.steps[1].result.as_ref().unwrap()["SpotFleetRequestConfigs"];
        let east = &report.steps[2].result.as_ref().unwrap()["SpotFleetRequestConfigs"];
        assert!(west.as_array().unwrap().is_empty());
        assert_eq!(east.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let result: Result<Scenario, _> = serde_json::from_value(json!({
            "steps": [{ "action": "reboot_everything" }]
        }));
        assert!(result.is_err());
    }
}
