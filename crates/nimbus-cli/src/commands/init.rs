use std::path::Path;

use nimbus_core::EmulatorConfig;

pub fn init(output: Option<&Path>) -> anyhow::Result<()> {
    let content = EmulatorConfig::scaffold().to_toml_string()?;

    match output {
        Some(path) => {
            std::fs::write(path, content)?;
            println!("✓ Generated {}", path.display());
        }
        None => print!("{content}"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nimbus.toml");

        init(Some(&path)).unwrap();

        let config = EmulatorConfig::from_file(&path).unwrap();
        let scaffold = EmulatorConfig::scaffold();
        assert_eq!(config.emulator.region, scaffold.emulator.region);
        assert_eq!(config.compute.on_demand_prices, scaffold.compute.on_demand_prices);
        assert_eq!(config.compute.on_demand_price("t2.small"), Some(0.023));
    }
}
