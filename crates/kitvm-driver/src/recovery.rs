//! Cleanup of PID files left behind by an unclean shutdown.

use crate::error::{DriverError, Result};
use crate::process::ProcessLocator;
use std::io::ErrorKind;
use std::path::Path;

/// Remove a stale PID file before launching the hypervisor.
///
/// If a live hypervisor owns `pid_file`, the file is left untouched: another
/// instance may legitimately be running. In every other case (no file,
/// garbage content, dead or recycled pid) the file is deleted so the next
/// launch does not trip over a leftover from a crash.
///
/// # Errors
/// Returns an error if the file exists but cannot be removed.
pub fn recover_from_unclean_shutdown(locator: &ProcessLocator<'_>, pid_file: &Path) -> Result<()> {
    match locator.find_owning_process(pid_file) {
        Ok(Some(process)) => {
            tracing::debug!(pid = process.pid, "hyperkit is running, pid file is not stale");
            return Ok(());
        }
        Ok(None) => {}
        Err(e) => {
            tracing::debug!(error = %e, "pid file is unusable, treating it as stale");
        }
    }

    match std::fs::remove_file(pid_file) {
        Ok(()) => {
            tracing::debug!(path = %pid_file.display(), "Removed stale pid file");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(DriverError::RemovePidFile {
            path: pid_file.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ProcessInfo, ProcessTable};
    use tempfile::TempDir;

    struct OneProcess(u32, &'static str);

    impl ProcessTable for OneProcess {
        fn find(&self, pid: u32) -> Result<Option<ProcessInfo>> {
            Ok((pid == self.0).then(|| ProcessInfo {
                pid,
                name: self.1.to_string(),
            }))
        }
    }

    #[test]
    fn test_keeps_pid_file_of_running_hypervisor() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("hyperkit.pid");
        std::fs::write(&pid_file, "77").unwrap();

        let table = OneProcess(77, "hyperkit");
        recover_from_unclean_shutdown(&ProcessLocator::new(&table, "hyper"), &pid_file).unwrap();
        assert!(pid_file.exists());
    }

    #[test]
    fn test_removes_stale_pid_file() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("hyperkit.pid");
        std::fs::write(&pid_file, "78").unwrap();

        let table = OneProcess(77, "hyperkit");
        recover_from_unclean_shutdown(&ProcessLocator::new(&table, "hyper"), &pid_file).unwrap();
        assert!(!pid_file.exists());
    }

    #[test]
    fn test_removes_pid_file_of_recycled_pid() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("hyperkit.pid");
        std::fs::write(&pid_file, "77").unwrap();

        let table = OneProcess(77, "Safari");
        recover_from_unclean_shutdown(&ProcessLocator::new(&table, "hyper"), &pid_file).unwrap();
        assert!(!pid_file.exists());
    }

    #[test]
    fn test_removes_unparsable_pid_file() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("hyperkit.pid");
        std::fs::write(&pid_file, "garbage").unwrap();

        let table = OneProcess(77, "hyperkit");
        recover_from_unclean_shutdown(&ProcessLocator::new(&table, "hyper"), &pid_file).unwrap();
        assert!(!pid_file.exists());
    }

    #[test]
    fn test_missing_pid_file_is_fine() {
        let dir = TempDir::new().unwrap();
        let table = OneProcess(77, "hyperkit");
        let result = recover_from_unclean_shutdown(
            &ProcessLocator::new(&table, "hyper"),
            &dir.path().join("hyperkit.pid"),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_surfaces_removal_failure() {
        let dir = TempDir::new().unwrap();
        // a non-empty directory where the pid file should be cannot be unlinked
        let pid_file = dir.path().join("hyperkit.pid");
        std::fs::create_dir(&pid_file).unwrap();
        std::fs::write(pid_file.join("inner"), "x").unwrap();

        let table = OneProcess(77, "hyperkit");
        let result = recover_from_unclean_shutdown(&ProcessLocator::new(&table, "hyper"), &pid_file);
        assert!(matches!(result, Err(DriverError::RemovePidFile { .. })));
    }
}
