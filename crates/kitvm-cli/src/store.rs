//! On-disk machine store: one directory per machine holding `config.json`.

use anyhow::{Context, Result};
use kitvm_driver::MachineConfig;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.json";

/// Directory holding everything that belongs to `machine`.
pub fn machine_dir(store: &Path, machine: &str) -> PathBuf {
    store.join(machine)
}

fn config_path(machine_dir: &Path) -> PathBuf {
    machine_dir.join(CONFIG_FILE)
}

/// Load the persisted configuration of the machine in `machine_dir`.
pub fn load(machine_dir: &Path) -> Result<MachineConfig> {
    let path = config_path(machine_dir);
    let raw = std::fs::read(&path)
        .with_context(|| format!("machine config not found at {}", path.display()))?;
    let config: MachineConfig = serde_json::from_slice(&raw)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}

/// Persist `config` into its store directory.
pub fn save(config: &MachineConfig) -> Result<()> {
    let dir = &config.base.store_path;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating machine directory {}", dir.display()))?;

    let path = config_path(dir);
    let json = serde_json::to_vec_pretty(config)?;
    std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    tracing::debug!(path = %path.display(), "Saved machine config");
    Ok(())
}

/// Fail unless `candidate` describes the same machine in the same place.
///
/// The store directory is derived from the machine name, so a snapshot that
/// changes either would be saved where the next command cannot find it.
pub fn ensure_same_machine(current: &MachineConfig, candidate: &MachineConfig) -> Result<()> {
    if candidate.base.machine_name != current.base.machine_name {
        anyhow::bail!(
            "machine name cannot be changed ({} -> {})",
            current.base.machine_name,
            candidate.base.machine_name
        );
    }
    if candidate.base.store_path != current.base.store_path {
        anyhow::bail!(
            "store path cannot be changed ({} -> {})",
            current.base.store_path.display(),
            candidate.base.store_path.display()
        );
    }
    Ok(())
}

/// Delete the machine directory and everything in it.
pub fn purge(machine_dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(machine_dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            Err(e).with_context(|| format!("removing machine directory {}", machine_dir.display()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kitvm_driver::DriverSettings;
    use tempfile::TempDir;

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let machine = machine_dir(dir.path(), "crc");
        let mut config = MachineConfig::new("crc", &machine, &DriverSettings::default());
        config.base.ip_address = Some("192.168.64.2".into());
        config.vsock_ports = vec!["22".into()];

        save(&config).unwrap();
        assert!(machine.join("config.json").exists());

        let loaded = load(&machine).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_machine() {
        let dir = TempDir::new().unwrap();
        let err = load(&machine_dir(dir.path(), "ghost")).unwrap_err();
        assert!(err.to_string().contains("machine config not found"));
    }

    #[test]
    fn test_load_corrupt_config() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.json"), "{").unwrap();
        assert!(load(dir.path()).is_err());
    }

    #[test]
    fn test_purge() {
        let dir = TempDir::new().unwrap();
        let machine = machine_dir(dir.path(), "crc");
        std::fs::create_dir_all(&machine).unwrap();
        std::fs::write(machine.join("crc.qcow2"), b"disk").unwrap();

        purge(&machine).unwrap();
        assert!(!machine.exists());
        // already gone
        purge(&machine).unwrap();
    }

    #[test]
    fn test_ensure_same_machine() {
        let current = MachineConfig::new("crc", "/s/crc", &DriverSettings::default());

        let mut resized = current.clone();
        resized.cpus += 2;
        assert!(ensure_same_machine(&current, &resized).is_ok());

        let mut moved = current.clone();
        moved.base.store_path = PathBuf::from("/elsewhere/crc");
        let err = ensure_same_machine(&current, &moved).unwrap_err();
        assert!(err.to_string().contains("store path cannot be changed"));

        let mut renamed = current.clone();
        renamed.base.machine_name = "dev".into();
        let err = ensure_same_machine(&current, &renamed).unwrap_err();
        assert!(err.to_string().contains("machine name cannot be changed"));
    }
}
