//! Hypervisor invocation.
//!
//! The driver describes the VM it wants as a [`LaunchSpec`] and hands it to a
//! [`Hypervisor`]. The default [`HyperkitBinary`] renders that description as a
//! hyperkit command line and launches it in the background; hyperkit records
//! its own pid in the PID file passed with `-F`.

use crate::error::{DriverError, Result};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// A block device attached to the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskConfig {
    /// Disk location, e.g. `file:///path/to/disk.qcow2`
    pub path: String,
    /// Device model
    pub driver: String,
    /// On-disk format as understood by the device model
    pub format: String,
}

/// Everything needed to launch one VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Hypervisor executable
    pub hypervisor_path: PathBuf,
    /// VPNKit socket used for networking when vmnet is off
    pub vpnkit_sock: Option<PathBuf>,
    /// Private state directory (console logs, vsock sockets)
    pub state_dir: PathBuf,
    /// PID file the hypervisor writes on launch
    pub pid_file: PathBuf,
    /// Kernel image
    pub kernel: PathBuf,
    /// Initial ramdisk
    pub initrd: PathBuf,
    /// Use the vmnet backend
    pub vmnet: bool,
    /// Number of vCPUs
    pub cpus: u32,
    /// Memory in MiB
    pub memory_mib: u64,
    /// Machine UUID
    pub uuid: String,
    /// Attach a virtio-sock device
    pub vsock: bool,
    /// vsock guest context id
    pub vsock_guest_cid: u32,
    /// Guest ports forwarded over vsock
    pub vsock_ports: Vec<u32>,
    /// Attached disks
    pub disks: Vec<DiskConfig>,
}

impl LaunchSpec {
    /// Render the hypervisor argument vector for `cmdline`.
    pub fn to_args(&self, cmdline: &str) -> Vec<String> {
        let state = self.state_dir.display();
        let mut args: Vec<String> = vec![
            "-A".into(),
            "-u".into(),
            "-F".into(),
            self.pid_file.display().to_string(),
            "-c".into(),
            self.cpus.to_string(),
            "-m".into(),
            format!("{}M", self.memory_mib),
            "-s".into(),
            "0:0,hostbridge".into(),
            "-s".into(),
            "31,lpc".into(),
        ];

        if self.vmnet {
            args.extend(["-s".to_string(), "1:0,virtio-net".to_string()]);
        } else if let Some(sock) = &self.vpnkit_sock {
            args.extend(["-s".to_string(), format!("1:0,virtio-vpnkit,path={}", sock.display())]);
        }

        if !self.uuid.is_empty() {
            args.extend(["-U".to_string(), self.uuid.clone()]);
        }

        let mut slot = 2;
        for disk in &self.disks {
            args.extend([
                "-s".to_string(),
                format!("{slot}:0,{},{},format={}", disk.driver, disk.path, disk.format),
            ]);
            slot += 1;
        }

        if self.vsock {
            let mut device = format!(
                "{slot},virtio-sock,guest_cid={},path={state}",
                self.vsock_guest_cid
            );
            if !self.vsock_ports.is_empty() {
                let forwards: Vec<String> = self.vsock_ports.iter().map(u32::to_string).collect();
                device.push_str(&format!(",guest_forwards={}", forwards.join(";")));
            }
            args.extend(["-s".to_string(), device]);
        }

        // serial console goes to a pty plus a ring log in the state directory
        args.extend([
            "-l".to_string(),
            format!("com1,autopty={state}/tty,log={state}/console-ring"),
        ]);

        args.extend([
            "-f".to_string(),
            format!(
                "kexec,{},{},{cmdline}",
                self.kernel.display(),
                self.initrd.display()
            ),
        ]);

        args
    }
}

/// Launches the hypervisor process.
pub trait Hypervisor: Send + Sync {
    /// Launch the VM described by `spec`, booting the kernel with `cmdline`.
    ///
    /// Returns once the process has been started; it is up to the caller to
    /// wait for it to show up as running.
    fn start(&self, spec: &LaunchSpec, cmdline: &str) -> Result<()>;
}

/// Runs the hyperkit executable in the background.
#[derive(Debug, Default, Clone, Copy)]
pub struct HyperkitBinary;

impl Hypervisor for HyperkitBinary {
    fn start(&self, spec: &LaunchSpec, cmdline: &str) -> Result<()> {
        let fail = |reason: String| DriverError::Hypervisor {
            cmdline: cmdline.to_string(),
            reason,
        };

        for (what, path) in [
            ("hyperkit", &spec.hypervisor_path),
            ("kernel", &spec.kernel),
            ("initrd", &spec.initrd),
        ] {
            if !path.exists() {
                return Err(fail(format!("{what} not found at {}", path.display())));
            }
        }

        std::fs::create_dir_all(&spec.state_dir)
            .map_err(|e| fail(format!("creating {}: {e}", spec.state_dir.display())))?;

        let log_path = spec.state_dir.join("hyperkit.log");
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| fail(format!("opening {}: {e}", log_path.display())))?;
        let log_err = log
            .try_clone()
            .map_err(|e| fail(format!("opening {}: {e}", log_path.display())))?;

        let args = spec.to_args(cmdline);
        tracing::debug!(
            binary = %spec.hypervisor_path.display(),
            args = %args.join(" "),
            "Trying to execute hyperkit"
        );

        let mut child = Command::new(&spec.hypervisor_path)
            .args(&args)
            .current_dir(&spec.state_dir)
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(log_err)
            .spawn()
            .map_err(|e| fail(e.to_string()))?;

        let pid = child.id();
        tracing::info!(pid, "hyperkit launched");

        // Reap the child if it exits while this process is still around, so
        // a dead hypervisor never lingers as a zombie in the process table.
        std::thread::spawn(move || match child.wait() {
            Ok(status) => tracing::debug!(pid, %status, "hyperkit exited"),
            Err(e) => tracing::warn!(pid, error = %e, "waiting for hyperkit failed"),
        });

        Ok(())
    }
}
