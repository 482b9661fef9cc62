//! Error types for kitvm-driver.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for kitvm-driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;

/// Errors that can occur while driving the machine lifecycle.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Networking is enabled but the process lacks elevated privileges
    #[error(
        "{exe_name} needs to run with elevated permissions. \
         Please run the following command, then try again: \
         sudo chown root:wheel {path} && sudo chmod u+s {path}",
        path = .exe_path.display()
    )]
    Permission { exe_name: String, exe_path: PathBuf },

    /// The running executable could not be located for the permission message
    #[error("cannot locate current executable: {0}")]
    CurrentExe(#[source] std::io::Error),

    /// The PID file exists but could not be read
    #[error("error reading pidfile {}: {source}", .path.display())]
    PidFileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The PID file does not contain a decimal process id
    #[error("parsing {}: {content:?} is not a process id", .path.display())]
    PidFileParse { path: PathBuf, content: String },

    /// A stale PID file could not be removed
    #[error("removing pidFile {}: {source}", .path.display())]
    RemovePidFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configured vsock port is not an integer
    #[error("vsock port '{0}' is not an integer")]
    InvalidPort(String),

    /// The disk image format is not the supported one
    #[error("Unsupported VM image format: {0}")]
    UnsupportedFormat(String),

    /// Copying the source disk image into the machine store failed
    #[error("copying disk image {} to {}: {source}", .from.display(), .to.display())]
    DiskCopy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The hypervisor collaborator failed to launch the VM
    #[error("starting with cmd line: {cmdline}: {reason}")]
    Hypervisor { cmdline: String, reason: String },

    /// MAC or IP resolution failed
    #[error("address resolution failed: {0}")]
    Resolver(String),

    /// The hypervisor process has not shown up in the process table yet
    #[error("hyperkit not running yet")]
    NotRunningYet,

    /// The hypervisor process is still alive after the stop signal
    #[error("hyperkit still running")]
    NotStoppedYet,

    /// No DHCP lease matches the MAC address yet
    #[error("no dhcp lease found for {0}")]
    IpNotAssigned(String),

    /// A retry loop was given no attempts at all
    #[error("no attempts were made")]
    NeverAttempted,

    /// A retry loop exhausted its budget
    #[error("exceeded {attempts} attempts: {last}")]
    AttemptsExceeded {
        attempts: u32,
        #[source]
        last: Box<DriverError>,
    },

    /// The hypervisor process never reached the running state
    #[error("VM failed to start: {0}")]
    VmFailedToStart(#[source] Box<DriverError>),

    /// The guest never acquired a DHCP lease
    #[error("IP address never found in dhcp leases file {0}")]
    IpNeverFound(#[source] Box<DriverError>),

    /// The VM did not stop within the graceful shutdown budget
    #[error("VM Failed to gracefully shutdown, try the kill command")]
    GracefulShutdownFailed,

    /// No live hypervisor process owns the PID file
    #[error("no running hypervisor process found for {}", .pid_file.display())]
    ProcessNotFound { pid_file: PathBuf },

    /// Delivering a signal to the hypervisor process failed
    #[error("sending {signal} to pid {pid} failed: {source}")]
    Signal {
        pid: u32,
        signal: &'static str,
        #[source]
        source: nix::Error,
    },

    /// The requested configuration change is not supported
    #[error("not implemented")]
    NotImplemented,

    /// Configuration is invalid
    #[error("configuration error: {0}")]
    InvalidConfig(String),

    /// JSON serialization/deserialization error
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    /// Whether the error is (or wraps) an exhausted retry budget.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::AttemptsExceeded { .. }
                | Self::VmFailedToStart(_)
                | Self::IpNeverFound(_)
                | Self::GracefulShutdownFailed
        )
    }
}
