//! # kitvm-driver
//!
//! Lifecycle driver for a single hyperkit-backed virtual machine.
//!
//! The VM state is never stored. It is derived on every query from the PID
//! file hyperkit writes into the machine's store directory and from the host
//! process table, so stale PID files left by crashes never report a running
//! machine.
//!
//! ## Quick Start
//!
//! ```no_run
//! use kitvm_driver::{DriverSettings, MachineConfig, MachineDriver, VmState};
//!
//! # fn example() -> kitvm_driver::Result<()> {
//! let settings = DriverSettings::from_env();
//! let mut config = MachineConfig::new("crc", "/var/lib/kitvm/crc", &settings);
//! config.kernel_path = "/var/lib/kitvm/crc/vmlinuz".into();
//! config.initrd_path = "/var/lib/kitvm/crc/initramfs.img".into();
//! config.image_source_path = "/var/lib/kitvm/images/crc.qcow2".into();
//!
//! let mut driver = MachineDriver::with_system_backends(config, settings);
//! driver.create()?;
//! assert_eq!(driver.state()?, VmState::Running);
//!
//! driver.stop()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Lifecycle Management**: Create, start, stop, kill, remove and restart
//! - **Crash Recovery**: Stale PID files are cleaned up before every start
//! - **Bounded Polling**: Configurable retry budgets for boot, DHCP and shutdown
//! - **Live Resize**: CPU/memory configuration updates
//! - **Pluggable Host**: Hypervisor, process table, signals, privileges and
//!   address resolution sit behind traits

mod config;
mod driver;
mod error;
mod hypervisor;
mod network;
mod permissions;
mod process;
mod recovery;
mod retry;
mod settings;

pub use config::{MachineBase, MachineConfig};
pub use driver::{Backends, MachineDriver, VmState};
pub use error::{DriverError, Result};
pub use hypervisor::{DiskConfig, HyperkitBinary, Hypervisor, LaunchSpec};
pub use network::{
    find_ip_in_leases, parse_leases, trim_mac_address, AddressResolver, DhcpLease,
    LeaseFileResolver,
};
pub use permissions::{verify_root_permissions, EffectiveUser, PrivilegeCheck};
pub use process::{
    read_pid_file, ProcessInfo, ProcessLocator, ProcessTable, Signaller, StopSignal,
    SystemProcessTable, UnixSignaller,
};
pub use recovery::recover_from_unclean_shutdown;
pub use retry::{retry, Attempt};
pub use settings::{DriverSettings, RetryBudget, DRIVER_NAME, DRIVER_VERSION};
