use std::path::Path;

use anyhow::Context;
use nimbus_core::EmulatorConfig;

use crate::scenario::{Scenario, ScenarioRunner};

pub fn run(scenario_path: &Path, config: EmulatorConfig) -> anyhow::Result<()> {
    let scenario = load_scenario(scenario_path)?;

    let mut runner = ScenarioRunner::new(config);
    let report = runner.run(&scenario);
    println!("{}", serde_json::to_string_pretty(&report)?);

    let failures = report.unexpected_failures();
    if failures > 0 {
        anyhow::bail!("{failures} scenario step(s) did not go as expected");
    }
    Ok(())
}

fn load_scenario(path: &Path) -> anyhow::Result<Scenario> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading scenario {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing scenario {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_run_scenario_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.json");
        fs::write(
            &path,
            r#"{
                "steps": [
                    { "action": "request_fleet", "alias": "f", "config": {
                        "TargetCapacity": 3,
                        "LaunchSpecifications": [{ "InstanceType": "t2.micro", "SpotPrice": "0.01" }]
                    } },
                    { "action": "cancel_fleets", "fleets": ["f"], "terminate_instances": true }
                ]
            }"#,
        )
        .unwrap();

        run(&path, EmulatorConfig::default()).unwrap();
    }

    #[test]
    fn test_failing_step_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.json");
        fs::write(
            &path,
            r#"{ "steps": [{ "action": "describe_fleet_instances", "fleet": "sfr-nope" }] }"#,
        )
        .unwrap();

        assert!(run(&path, EmulatorConfig::default()).is_err());
    }

    #[test]
    fn test_missing_or_malformed_scenario() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_scenario(&dir.path().join("absent.json")).is_err());

        let path = dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        let err = load_scenario(&path).unwrap_err();
        assert!(err.to_string().contains("parsing scenario"));
    }
}
