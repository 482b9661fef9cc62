//! Locating the hypervisor process that owns the machine's PID file.
//!
//! The PID file alone proves nothing: it survives crashes, and the kernel
//! recycles process ids. A machine only counts as running when a live process
//! with that pid exists *and* its executable name looks like the hypervisor.

use crate::error::{DriverError, Result};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid as UnixPid;
use std::io::ErrorKind;
use std::path::Path;
use sysinfo::{Pid, System};

/// A live process confirmed to be the machine's hypervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Process id
    pub pid: u32,
    /// Executable name as reported by the process table
    pub name: String,
}

/// Read access to the host process table.
pub trait ProcessTable: Send + Sync {
    /// Look up a process by pid. `Ok(None)` means no such process.
    fn find(&self, pid: u32) -> Result<Option<ProcessInfo>>;
}

/// Process table backed by the operating system, via sysinfo.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
    fn find(&self, pid: u32) -> Result<Option<ProcessInfo>> {
        let mut sys = System::new();
        let sys_pid = Pid::from_u32(pid);
        if !sys.refresh_process(sys_pid) {
            return Ok(None);
        }
        Ok(sys.process(sys_pid).map(|p| ProcessInfo {
            pid,
            name: p.name().to_string(),
        }))
    }
}

/// Read a decimal pid from `path`, ignoring surrounding whitespace.
///
/// Returns `Ok(None)` when the file does not exist.
pub fn read_pid_file(path: &Path) -> Result<Option<u32>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(DriverError::PidFileRead {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let trimmed = content.trim();
    trimmed
        .parse::<u32>()
        .map(Some)
        .map_err(|_| DriverError::PidFileParse {
            path: path.to_path_buf(),
            content: trimmed.to_string(),
        })
}

/// Resolves a PID file to the live hypervisor process owning it.
#[derive(Clone, Copy)]
pub struct ProcessLocator<'a> {
    table: &'a dyn ProcessTable,
    name_match: &'a str,
}

impl<'a> ProcessLocator<'a> {
    /// Create a locator matching executables whose name contains `name_match`.
    pub fn new(table: &'a dyn ProcessTable, name_match: &'a str) -> Self {
        Self { table, name_match }
    }

    /// Find the hypervisor process recorded in `pid_file`.
    ///
    /// Returns `Ok(None)` if:
    /// - the PID file does not exist,
    /// - no process with the recorded pid is alive,
    /// - the process alive under that pid is not the hypervisor.
    ///
    /// # Errors
    /// Returns an error if the PID file is unreadable or does not contain a
    /// pid, or if the process table cannot be queried.
    pub fn find_owning_process(&self, pid_file: &Path) -> Result<Option<ProcessInfo>> {
        let Some(pid) = read_pid_file(pid_file)? else {
            return Ok(None);
        };

        let Some(process) = self.table.find(pid)? else {
            tracing::debug!(pid, "hyperkit pid missing from process table");
            return Ok(None);
        };

        if !process.name.contains(self.name_match) {
            tracing::debug!(
                pid,
                executable = %process.name,
                "pid is stale, and is being used by another executable"
            );
            return Ok(None);
        }

        Ok(Some(process))
    }
}

/// Signals used to stop the hypervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// Graceful shutdown (SIGTERM)
    Terminate,
    /// Immediate termination (SIGKILL)
    Kill,
}

impl StopSignal {
    /// Signal name, for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            StopSignal::Terminate => "SIGTERM",
            StopSignal::Kill => "SIGKILL",
        }
    }

    fn as_unix(self) -> Signal {
        match self {
            StopSignal::Terminate => Signal::SIGTERM,
            StopSignal::Kill => Signal::SIGKILL,
        }
    }
}

/// Delivers stop signals to a process.
pub trait Signaller: Send + Sync {
    /// Send `signal` to `pid`.
    fn send(&self, pid: u32, signal: StopSignal) -> Result<()>;
}

/// Signaller using `kill(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixSignaller;

impl Signaller for UnixSignaller {
    fn send(&self, pid: u32, signal: StopSignal) -> Result<()> {
        let signal_error = |source| DriverError::Signal {
            pid,
            signal: signal.name(),
            source,
        };
        let raw = i32::try_from(pid).map_err(|_| signal_error(Errno::EINVAL))?;
        signal::kill(UnixPid::from_raw(raw), signal.as_unix()).map_err(signal_error)
    }
}
