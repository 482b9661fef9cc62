//! Machine configuration owned by a [`MachineDriver`](crate::MachineDriver).

use crate::error::{DriverError, Result};
use crate::settings::DriverSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Fields every machine carries regardless of its hypervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineBase {
    /// Machine name, also the stem of the disk image file
    pub machine_name: String,
    /// Private state directory of this machine
    pub store_path: PathBuf,
    /// Guest IP, cached once resolved from the lease file
    #[serde(default)]
    pub ip_address: Option<String>,
    /// SSH user inside the guest
    pub ssh_user: String,
}

impl MachineBase {
    /// Resolve `file` relative to the machine store directory.
    pub fn resolve_store_path(&self, file: &str) -> PathBuf {
        self.store_path.join(file)
    }
}

/// Configuration of a hyperkit-backed machine.
///
/// Replaced wholesale on a configuration update, never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Common machine fields
    pub base: MachineBase,
    /// Number of virtual CPUs
    pub cpus: u32,
    /// Memory size in MiB
    pub memory_mib: u64,
    /// Whether vmnet networking is enabled (requires root)
    #[serde(default)]
    pub vmnet: bool,
    /// Path to the hyperkit binary
    pub hypervisor_path: PathBuf,
    /// VPNKit socket, used instead of vmnet when set
    #[serde(default)]
    pub vpnkit_sock: Option<PathBuf>,
    /// Path to the kernel image
    pub kernel_path: PathBuf,
    /// Path to the initrd image
    pub initrd_path: PathBuf,
    /// Source disk image copied into the store on create
    pub image_source_path: PathBuf,
    /// Disk image format (extension of the stored disk)
    pub image_format: String,
    /// Kernel command line
    #[serde(default)]
    pub cmdline: String,
    /// Machine UUID, also the seed of the guest MAC address
    pub uuid: String,
    /// Guest vsock ports forwarded to the host
    #[serde(default)]
    pub vsock_ports: Vec<String>,
}

impl MachineConfig {
    /// Create a configuration with the driver defaults for `machine_name`,
    /// stored under `store_path`.
    pub fn new(
        machine_name: impl Into<String>,
        store_path: impl Into<PathBuf>,
        settings: &DriverSettings,
    ) -> Self {
        Self {
            base: MachineBase {
                machine_name: machine_name.into(),
                store_path: store_path.into(),
                ip_address: None,
                ssh_user: settings.default_ssh_user.clone(),
            },
            cpus: settings.default_cpus,
            memory_mib: settings.default_memory_mib,
            vmnet: false,
            hypervisor_path: PathBuf::from("/usr/local/bin/hyperkit"),
            vpnkit_sock: None,
            kernel_path: PathBuf::new(),
            initrd_path: PathBuf::new(),
            image_source_path: PathBuf::new(),
            image_format: settings.supported_image_format.clone(),
            cmdline: String::new(),
            uuid: Uuid::new_v4().to_string(),
            vsock_ports: Vec::new(),
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.base.machine_name.is_empty() {
            return Err(DriverError::InvalidConfig("machine_name is required".into()));
        }
        if self.cpus == 0 {
            return Err(DriverError::InvalidConfig("cpus must be > 0".into()));
        }
        if self.memory_mib == 0 {
            return Err(DriverError::InvalidConfig("memory_mib must be > 0".into()));
        }
        if Uuid::parse_str(&self.uuid).is_err() {
            return Err(DriverError::InvalidConfig(format!(
                "uuid is not a valid UUID: {}",
                self.uuid
            )));
        }
        Ok(())
    }

    /// Path of the machine's private disk image.
    pub fn disk_path(&self) -> PathBuf {
        self.base.resolve_store_path(&format!(
            "{}.{}",
            self.base.machine_name, self.image_format
        ))
    }

    /// Path of the PID file written by the hypervisor.
    pub fn pid_file_path(&self, settings: &DriverSettings) -> PathBuf {
        self.base.resolve_store_path(&settings.pid_file_name)
    }

    /// Parse the configured vsock ports, preserving their order.
    ///
    /// # Errors
    /// Returns [`DriverError::InvalidPort`] naming the first entry that is
    /// not an integer.
    pub fn extract_vsock_ports(&self) -> Result<Vec<u32>> {
        self.vsock_ports
            .iter()
            .map(|port| {
                port.parse::<u32>()
                    .map_err(|_| DriverError::InvalidPort(port.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MachineConfig {
        MachineConfig::new("crc", "/tmp/kitvm/crc", &DriverSettings::default())
    }

    #[test]
    fn test_defaults_from_settings() {
        let config = sample();
        assert_eq!(config.cpus, 4);
        assert_eq!(config.memory_mib, 8192);
        assert_eq!(config.base.ssh_user, "core");
        assert_eq!(config.image_format, "qcow2");
        assert!(!config.vmnet);
        assert!(config.base.ip_address.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_paths() {
        let config = sample();
        assert_eq!(config.disk_path(), PathBuf::from("/tmp/kitvm/crc/crc.qcow2"));
        assert_eq!(
            config.pid_file_path(&DriverSettings::default()),
            PathBuf::from("/tmp/kitvm/crc/hyperkit.pid")
        );
    }

    #[test]
    fn test_validate() {
        let mut config = sample();
        config.cpus = 0;
        assert!(config.validate().is_err());

        let mut config = sample();
        config.memory_mib = 0;
        assert!(config.validate().is_err());

        let mut config = sample();
        config.uuid = "not-a-uuid".into();
        assert!(config.validate().is_err());

        let mut config = sample();
        config.base.machine_name.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_vsock_ports_preserve_order() {
        let mut config = sample();
        config.vsock_ports = vec!["2222".into(), "22".into(), "1024".into()];
        assert_eq!(config.extract_vsock_ports().unwrap(), vec![2222, 22, 1024]);
    }

    #[test]
    fn test_vsock_ports_reject_first_invalid() {
        let mut config = sample();
        config.vsock_ports = vec!["22".into(), "2222".into(), "notanumber".into()];
        match config.extract_vsock_ports() {
            Err(DriverError::InvalidPort(port)) => assert_eq!(port, "notanumber"),
            other => panic!("expected InvalidPort, got {other:?}"),
        }
    }

    #[test]
    fn test_serde_roundtrip_keeps_cached_ip() {
        let mut config = sample();
        config.base.ip_address = Some("192.168.64.2".into());
        let json = serde_json::to_string(&config).unwrap();
        let back: MachineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
