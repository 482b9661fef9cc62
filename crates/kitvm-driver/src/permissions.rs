//! Root permission checks for vmnet networking.

use crate::error::{DriverError, Result};
use nix::unistd::geteuid;
use std::path::Path;

/// Reports whether the current process runs with elevated privileges.
pub trait PrivilegeCheck: Send + Sync {
    /// `true` when the effective user is privileged.
    fn is_privileged(&self) -> bool;
}

/// Checks the effective user id of the current process.
#[derive(Debug, Default, Clone, Copy)]
pub struct EffectiveUser;

impl PrivilegeCheck for EffectiveUser {
    fn is_privileged(&self) -> bool {
        let euid = geteuid();
        tracing::debug!(euid = euid.as_raw(), "checking effective uid");
        euid.is_root()
    }
}

/// Fail unless the process may open vmnet devices.
///
/// Only machines with vmnet networking need root; for everything else the
/// check is skipped.
///
/// # Errors
/// Returns [`DriverError::Permission`] carrying remediation instructions for
/// the running executable.
pub fn verify_root_permissions(vmnet: bool, check: &dyn PrivilegeCheck) -> Result<()> {
    if !vmnet || check.is_privileged() {
        return Ok(());
    }
    let exe = std::env::current_exe().map_err(DriverError::CurrentExe)?;
    Err(permission_error(&exe))
}

fn permission_error(exe: &Path) -> DriverError {
    let exe_name = exe
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| exe.display().to_string());
    DriverError::Permission {
        exe_name,
        exe_path: exe.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct Fixed(bool);

    impl PrivilegeCheck for Fixed {
        fn is_privileged(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn test_skipped_without_vmnet() {
        assert!(verify_root_permissions(false, &Fixed(false)).is_ok());
    }

    #[test]
    fn test_privileged_with_vmnet() {
        assert!(verify_root_permissions(true, &Fixed(true)).is_ok());
    }

    #[test]
    fn test_unprivileged_with_vmnet() {
        let err = verify_root_permissions(true, &Fixed(false)).unwrap_err();
        let exe = std::env::current_exe().unwrap();
        match err {
            DriverError::Permission { exe_name, exe_path } => {
                assert_eq!(exe_path, exe);
                assert_eq!(exe_name, exe.file_name().unwrap().to_string_lossy());
            }
            other => panic!("expected Permission, got {other:?}"),
        }
    }

    #[test]
    fn test_permission_error_uses_base_name() {
        let err = permission_error(&PathBuf::from("/opt/kitvm/bin/kitvm"));
        assert!(err.to_string().starts_with("kitvm needs to run"));
    }
}
