//! Command-line arguments.

use clap::{Args, Parser, Subcommand};
use kitvm_driver::{DriverSettings, MachineConfig};
use std::path::PathBuf;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "kitvm")]
#[command(about = "Manage hyperkit virtual machines")]
#[command(version)]
pub struct Cli {
    /// Directory holding one sub-directory per machine.
    #[arg(long, env = "KITVM_STORE")]
    pub store: PathBuf,

    /// Machine to operate on.
    #[arg(short, long, env = "KITVM_MACHINE", default_value = "crc")]
    pub machine: String,

    /// Log filter, used when RUST_LOG is unset.
    #[arg(long, default_value = "kitvm=info,kitvm_driver=info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Copy the disk image into the store and boot the machine
    Create(CreateArgs),
    /// Boot an existing machine
    Start,
    /// Shut the machine down gracefully
    Stop,
    /// Kill the hypervisor process
    Kill,
    /// Kill the machine if it runs and delete its store directory
    Remove,
    /// Stop, then start the machine
    Restart,
    /// Print the machine state
    Status,
    /// Print the guest IP address
    Ip,
    /// Apply a JSON configuration snapshot (CPU/memory changes only)
    UpdateConfig {
        /// File containing the full machine configuration as JSON
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Source disk image, copied into the machine store
    #[arg(long)]
    pub image: PathBuf,

    /// Kernel to boot
    #[arg(long)]
    pub kernel: PathBuf,

    /// Initial ramdisk
    #[arg(long)]
    pub initrd: PathBuf,

    /// Kernel command line
    #[arg(long, default_value = "")]
    pub cmdline: String,

    /// Virtual CPUs [default: driver default]
    #[arg(long)]
    pub cpus: Option<u32>,

    /// Memory in MiB [default: driver default]
    #[arg(long)]
    pub memory: Option<u64>,

    /// Use vmnet networking (requires root)
    #[arg(long)]
    pub vmnet: bool,

    /// Guest vsock port forwarded to the host; repeatable
    #[arg(long = "vsock-port")]
    pub vsock_ports: Vec<String>,

    /// Hypervisor executable
    #[arg(long, env = "KITVM_HYPERKIT")]
    pub hypervisor: Option<PathBuf>,

    /// VPNKit socket for userspace networking
    #[arg(long)]
    pub vpnkit_sock: Option<PathBuf>,

    /// Disk image format
    #[arg(long)]
    pub image_format: Option<String>,

    /// Machine UUID [default: random]
    #[arg(long)]
    pub uuid: Option<String>,
}

impl CreateArgs {
    /// Build the machine configuration, falling back to driver defaults.
    pub fn into_config(
        self,
        machine: &str,
        machine_dir: PathBuf,
        settings: &DriverSettings,
    ) -> MachineConfig {
        let mut config = MachineConfig::new(machine, machine_dir, settings);
        config.image_source_path = self.image;
        config.kernel_path = self.kernel;
        config.initrd_path = self.initrd;
        config.cmdline = self.cmdline;
        config.vmnet = self.vmnet;
        config.vsock_ports = self.vsock_ports;
        config.vpnkit_sock = self.vpnkit_sock;
        if let Some(cpus) = self.cpus {
            config.cpus = cpus;
        }
        if let Some(memory) = self.memory {
            config.memory_mib = memory;
        }
        if let Some(hypervisor) = self.hypervisor {
            config.hypervisor_path = hypervisor;
        }
        if let Some(format) = self.image_format {
            config.image_format = format;
        }
        if let Some(uuid) = self.uuid {
            config.uuid = uuid;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_create() {
        let cli = Cli::try_parse_from([
            "kitvm",
            "--store",
            "/var/lib/kitvm",
            "create",
            "--image",
            "/images/crc.qcow2",
            "--kernel",
            "/images/vmlinuz",
            "--initrd",
            "/images/initramfs.img",
            "--cpus",
            "2",
            "--vmnet",
            "--vsock-port",
            "22",
            "--vsock-port",
            "2222",
        ])
        .unwrap();

        assert_eq!(cli.machine, "crc");
        let Command::Create(args) = cli.command else {
            panic!("expected create");
        };
        let settings = DriverSettings::default();
        let config = args.into_config("crc", PathBuf::from("/var/lib/kitvm/crc"), &settings);

        assert_eq!(config.cpus, 2);
        assert_eq!(config.memory_mib, settings.default_memory_mib);
        assert!(config.vmnet);
        assert_eq!(config.vsock_ports, vec!["22", "2222"]);
        assert_eq!(config.image_format, "qcow2");
        assert_eq!(config.disk_path(), PathBuf::from("/var/lib/kitvm/crc/crc.qcow2"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_update_config() {
        let cli = Cli::try_parse_from([
            "kitvm",
            "--store",
            "/s",
            "--machine",
            "dev",
            "update-config",
            "new.json",
        ])
        .unwrap();

        assert_eq!(cli.machine, "dev");
        assert!(matches!(cli.command, Command::UpdateConfig { file } if file == PathBuf::from("new.json")));
    }

    #[test]
    fn test_create_requires_image() {
        let result = Cli::try_parse_from(["kitvm", "--store", "/s", "create", "--kernel", "k"]);
        assert!(result.is_err());
    }
}
