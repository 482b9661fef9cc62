//! MachineDriver - lifecycle state machine for one hyperkit VM.
//!
//! The driver keeps no record of whether the VM runs. Every state query goes
//! back to the PID file and the process table, so a crash or an external
//! `kill` is picked up on the next call.

use crate::config::MachineConfig;
use crate::error::{DriverError, Result};
use crate::hypervisor::{DiskConfig, Hypervisor, HyperkitBinary, LaunchSpec};
use crate::network::{trim_mac_address, AddressResolver, LeaseFileResolver};
use crate::permissions::{verify_root_permissions, EffectiveUser, PrivilegeCheck};
use crate::process::{
    ProcessInfo, ProcessLocator, ProcessTable, Signaller, StopSignal, SystemProcessTable,
    UnixSignaller,
};
use crate::recovery::recover_from_unclean_shutdown;
use crate::retry::{retry, Attempt};
use crate::settings::DriverSettings;
use std::path::PathBuf;

/// Current state of the VM, derived on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// A live hypervisor process owns the PID file
    Running,
    /// No live hypervisor process owns the PID file
    Stopped,
    /// The state could not be determined
    Error,
}

impl std::fmt::Display for VmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VmState::Running => write!(f, "Running"),
            VmState::Stopped => write!(f, "Stopped"),
            VmState::Error => write!(f, "Error"),
        }
    }
}

/// External collaborators the driver talks to.
pub struct Backends {
    /// Launches the hypervisor process
    pub hypervisor: Box<dyn Hypervisor>,
    /// Host process table
    pub processes: Box<dyn ProcessTable>,
    /// Stop signal delivery
    pub signaller: Box<dyn Signaller>,
    /// Effective privilege check
    pub privileges: Box<dyn PrivilegeCheck>,
    /// MAC and IP resolution
    pub resolver: Box<dyn AddressResolver>,
}

impl Backends {
    /// The real host: hyperkit binary, sysinfo, `kill(2)`, euid and the
    /// bootpd lease file.
    pub fn system(settings: &DriverSettings) -> Self {
        Self {
            hypervisor: Box::new(HyperkitBinary),
            processes: Box::new(SystemProcessTable),
            signaller: Box::new(UnixSignaller),
            privileges: Box::new(EffectiveUser),
            resolver: Box::new(LeaseFileResolver::new(&settings.lease_file)),
        }
    }
}

/// Drives the lifecycle of a single hyperkit-backed machine.
///
/// Operations block the calling thread until they complete or their retry
/// budget runs out. The driver is not meant to be shared between threads
/// while an operation is in flight.
pub struct MachineDriver {
    config: MachineConfig,
    settings: DriverSettings,
    backends: Backends,
}

impl MachineDriver {
    /// Create a driver with explicit collaborators.
    pub fn new(config: MachineConfig, settings: DriverSettings, backends: Backends) -> Self {
        Self {
            config,
            settings,
            backends,
        }
    }

    /// Create a driver talking to the real host.
    pub fn with_system_backends(config: MachineConfig, settings: DriverSettings) -> Self {
        let backends = Backends::system(&settings);
        Self::new(config, settings, backends)
    }

    /// The live machine configuration.
    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Driver-wide settings.
    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    /// Name of the driver.
    pub fn driver_name(&self) -> &str {
        &self.settings.driver_name
    }

    /// Version of the driver.
    pub fn driver_version(&self) -> &str {
        &self.settings.driver_version
    }

    /// Hostname for SSH: the cached guest IP, if one was resolved.
    pub fn ssh_hostname(&self) -> Option<&str> {
        self.config.base.ip_address.as_deref()
    }

    /// Docker URL of the machine. Not implemented; always empty.
    pub fn url(&self) -> String {
        String::new()
    }

    fn pid_file(&self) -> PathBuf {
        self.config.pid_file_path(&self.settings)
    }

    fn locator(&self) -> ProcessLocator<'_> {
        ProcessLocator::new(
            self.backends.processes.as_ref(),
            &self.settings.process_name_match,
        )
    }

    fn verify_root_permissions(&self) -> Result<()> {
        verify_root_permissions(self.config.vmnet, self.backends.privileges.as_ref())
    }

    /// Checks to run before [`create`](Self::create).
    pub fn pre_create_check(&self) -> Result<()> {
        self.verify_root_permissions()
    }

    /// Copy the source image into the machine store, then start the VM.
    pub fn create(&mut self) -> Result<()> {
        self.verify_root_permissions()?;

        let from = self.config.image_source_path.clone();
        let to = self.config.disk_path();
        tracing::info!(
            machine = %self.config.base.machine_name,
            from = %from.display(),
            to = %to.display(),
            "Creating machine"
        );

        std::fs::create_dir_all(&self.config.base.store_path)?;
        std::fs::copy(&from, &to).map_err(|source| DriverError::DiskCopy {
            from: from.clone(),
            to: to.clone(),
            source,
        })?;

        self.start()
    }

    /// Query the VM state from the PID file and the process table.
    ///
    /// # Errors
    /// Returns an error only when the check itself cannot be performed
    /// (missing privileges, unreadable PID file, process table failure).
    pub fn state(&self) -> Result<VmState> {
        self.verify_root_permissions()?;

        match self.locator().find_owning_process(&self.pid_file())? {
            Some(_) => Ok(VmState::Running),
            None => Ok(VmState::Stopped),
        }
    }

    /// Like [`state`](Self::state), reporting a failed check as
    /// [`VmState::Error`].
    pub fn state_or_error(&self) -> VmState {
        self.state().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Error checking machine status");
            VmState::Error
        })
    }

    fn launch_spec(&self, vsock_ports: Vec<u32>) -> LaunchSpec {
        LaunchSpec {
            hypervisor_path: self.config.hypervisor_path.clone(),
            vpnkit_sock: self.config.vpnkit_sock.clone(),
            state_dir: self.config.base.store_path.clone(),
            pid_file: self.pid_file(),
            kernel: self.config.kernel_path.clone(),
            initrd: self.config.initrd_path.clone(),
            vmnet: self.config.vmnet,
            cpus: self.config.cpus,
            memory_mib: self.config.memory_mib,
            uuid: self.config.uuid.clone(),
            vsock: true,
            vsock_guest_cid: self.settings.vsock_guest_cid,
            vsock_ports,
            disks: Vec::new(),
        }
    }

    /// Boot the VM and wait for it to run (and, with vmnet, to get an IP).
    pub fn start(&mut self) -> Result<()> {
        self.verify_root_permissions()?;

        recover_from_unclean_shutdown(&self.locator(), &self.pid_file())?;

        let vsock_ports = self.config.extract_vsock_ports()?;
        if self.config.image_format != self.settings.supported_image_format {
            return Err(DriverError::UnsupportedFormat(self.config.image_format.clone()));
        }

        let mut spec = self.launch_spec(vsock_ports);
        tracing::debug!(binary = %spec.hypervisor_path.display(), "Using hyperkit binary");

        let mac = if self.config.vmnet {
            tracing::debug!(uuid = %self.config.uuid, "Using UUID");
            let mac = self
                .backends
                .resolver
                .mac_for_uuid(&self.config.hypervisor_path, &self.config.uuid)?;
            // lease file keys drop the leading zero of each octet
            let mac = trim_mac_address(&mac);
            tracing::debug!(%mac, "Generated MAC");
            Some(mac)
        } else {
            None
        };

        spec.disks.push(DiskConfig {
            path: format!("file://{}", self.config.disk_path().display()),
            driver: "virtio-blk".into(),
            format: "qcow".into(),
        });

        tracing::info!(
            machine = %self.config.base.machine_name,
            cpus = spec.cpus,
            memory_mib = spec.memory_mib,
            cmdline = %self.config.cmdline,
            "Starting machine"
        );
        self.backends.hypervisor.start(&spec, &self.config.cmdline)?;

        tracing::debug!(max_wait = ?self.settings.start_budget.max_wait(), "Waiting for hyperkit");
        retry(self.settings.start_budget, || match self.state() {
            Ok(VmState::Running) => Attempt::Ready(()),
            Ok(_) => Attempt::Retry(DriverError::NotRunningYet),
            Err(e) => Attempt::Fatal(e),
        })
        .map_err(|e| DriverError::VmFailedToStart(Box::new(e)))?;

        let Some(mac) = mac else {
            tracing::info!(machine = %self.config.base.machine_name, "Machine started");
            return Ok(());
        };

        let resolver = self.backends.resolver.as_ref();
        tracing::debug!(%mac, max_wait = ?self.settings.ip_budget.max_wait(), "Waiting for DHCP lease");
        let ip = retry(self.settings.ip_budget, || match resolver.ip_for_mac(&mac) {
            Ok(Some(ip)) => Attempt::Ready(ip),
            Ok(None) => Attempt::Retry(DriverError::IpNotAssigned(mac.clone())),
            Err(e) => Attempt::Retry(e),
        })
        .map_err(|e| DriverError::IpNeverFound(Box::new(e)))?;

        tracing::info!(machine = %self.config.base.machine_name, %ip, "Machine started");
        self.config.base.ip_address = Some(ip);
        Ok(())
    }

    fn signal(&self, process: &ProcessInfo, signal: StopSignal) -> Result<()> {
        tracing::info!(pid = process.pid, signal = signal.name(), "Signalling hyperkit");
        self.backends.signaller.send(process.pid, signal)
    }

    /// Stop the VM gracefully, waiting for the hypervisor to exit.
    ///
    /// Stopping a stopped VM is a no-op.
    pub fn stop(&self) -> Result<()> {
        self.verify_root_permissions()?;

        // one lookup decides both the state and the pid to signal
        let Some(process) = self.locator().find_owning_process(&self.pid_file())? else {
            tracing::debug!("Machine already stopped");
            return Ok(());
        };

        self.signal(&process, StopSignal::Terminate)?;

        let budget = self.settings.stop_budget;
        tracing::debug!(max_wait = ?budget.max_wait(), "Waiting for hyperkit to exit");
        std::thread::sleep(budget.delay);
        retry(budget, || match self.state() {
            Ok(VmState::Stopped) => Attempt::Ready(()),
            Ok(state) => {
                tracing::debug!(%state, "VM state");
                Attempt::Retry(DriverError::NotStoppedYet)
            }
            Err(e) => Attempt::Retry(e),
        })
        .map_err(|e| {
            tracing::warn!(error = %e, "Graceful shutdown timed out");
            DriverError::GracefulShutdownFailed
        })?;

        tracing::info!(machine = %self.config.base.machine_name, "Machine stopped");
        Ok(())
    }

    /// Kill the hypervisor immediately. Does not wait for it to exit.
    pub fn kill(&self) -> Result<()> {
        self.verify_root_permissions()?;

        let pid_file = self.pid_file();
        let process = self
            .locator()
            .find_owning_process(&pid_file)?
            .ok_or(DriverError::ProcessNotFound { pid_file })?;
        self.signal(&process, StopSignal::Kill)
    }

    /// Remove the machine, killing it first if it runs.
    ///
    /// A failed state query is not fatal here: the machine may already be
    /// gone.
    pub fn remove(&self) -> Result<()> {
        self.verify_root_permissions()?;

        match self.state() {
            Ok(VmState::Running) => self.kill()?,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Error checking machine status, assuming it has been removed already"
                );
            }
        }
        Ok(())
    }

    /// Stop, then start again.
    pub fn restart(&mut self) -> Result<()> {
        self.stop()?;
        self.start()
    }

    /// Replace the configuration with the JSON snapshot in `raw`.
    ///
    /// Only CPU and memory changes are supported live; a snapshot that leaves
    /// both untouched is rejected with [`DriverError::NotImplemented`]. An
    /// accepted snapshot replaces every field, not just CPU and memory.
    pub fn update_config_raw(&mut self, raw: &[u8]) -> Result<()> {
        let candidate: MachineConfig = serde_json::from_slice(raw)?;

        if candidate.cpus == self.config.cpus && candidate.memory_mib == self.config.memory_mib {
            tracing::debug!("Config update changes neither cpus nor memory");
            return Err(DriverError::NotImplemented);
        }

        tracing::info!(
            cpus = candidate.cpus,
            memory_mib = candidate.memory_mib,
            "Applying configuration update"
        );
        self.config = candidate;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_state_display() {
        assert_eq!(VmState::Running.to_string(), "Running");
        assert_eq!(VmState::Stopped.to_string(), "Stopped");
        assert_eq!(VmState::Error.to_string(), "Error");
    }

    #[test]
    fn test_system_driver_metadata() {
        let settings = DriverSettings::default();
        let config = MachineConfig::new("crc", "/tmp/kitvm/crc", &settings);
        let driver = MachineDriver::with_system_backends(config, settings);
        assert_eq!(driver.driver_name(), "hyperkit");
        assert_eq!(driver.driver_version(), "0.12.11");
        assert_eq!(driver.url(), "");
        assert_eq!(driver.ssh_hostname(), None);
    }

    #[test]
    fn test_launch_spec_from_config() {
        let settings = DriverSettings::default();
        let mut config = MachineConfig::new("crc", "/tmp/kitvm/crc", &settings);
        config.cpus = 2;
        config.vmnet = true;
        let driver = MachineDriver::with_system_backends(config, settings);

        let spec = driver.launch_spec(vec![22]);
        assert_eq!(spec.cpus, 2);
        assert!(spec.vmnet);
        assert!(spec.vsock);
        assert_eq!(spec.vsock_guest_cid, 3);
        assert_eq!(spec.pid_file, PathBuf::from("/tmp/kitvm/crc/hyperkit.pid"));
        assert!(spec.disks.is_empty());
    }
}
