//! Driver-wide constants, passed to the driver at construction.
//!
//! Settings are loaded from environment variables with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

/// Name reported by the driver.
pub const DRIVER_NAME: &str = "hyperkit";

/// Version reported by the driver.
pub const DRIVER_VERSION: &str = "0.12.11";

/// Attempt count and inter-attempt delay for one poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    /// Maximum number of times the polled action runs.
    pub attempts: u32,
    /// Sleep between two consecutive attempts.
    pub delay: Duration,
}

impl RetryBudget {
    /// Create a budget of `attempts` tries spaced `delay` apart.
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Upper bound on the time spent sleeping inside the loop.
    pub fn max_wait(&self) -> Duration {
        self.delay * self.attempts.saturating_sub(1)
    }
}

/// Immutable driver settings shared by every lifecycle operation.
#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// Driver name reported to the orchestration layer.
    pub driver_name: String,
    /// Driver version reported to the orchestration layer.
    pub driver_version: String,
    /// Default vCPU count for new machines (default: 4).
    pub default_cpus: u32,
    /// Default memory size in MiB for new machines (default: 8192).
    pub default_memory_mib: u64,
    /// Default SSH user inside the guest (default: "core").
    pub default_ssh_user: String,
    /// PID file name inside the machine store directory.
    pub pid_file_name: String,
    /// Substring an executable name must contain to count as the hypervisor.
    ///
    /// "hyper" matches both `hyperkit` and `com.docker.hyper`.
    pub process_name_match: String,
    /// The only disk image format accepted by Start.
    pub supported_image_format: String,
    /// vsock guest context id.
    pub vsock_guest_cid: u32,
    /// DHCP lease file consulted for the guest IP.
    pub lease_file: PathBuf,
    /// Wait for the hypervisor process to appear after launch.
    pub start_budget: RetryBudget,
    /// Wait for the guest to acquire a DHCP lease.
    pub ip_budget: RetryBudget,
    /// Wait for the hypervisor to exit after SIGTERM.
    pub stop_budget: RetryBudget,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            driver_name: DRIVER_NAME.into(),
            driver_version: DRIVER_VERSION.into(),
            default_cpus: 4,
            default_memory_mib: 8192,
            default_ssh_user: "core".into(),
            pid_file_name: "hyperkit.pid".into(),
            process_name_match: "hyper".into(),
            supported_image_format: "qcow2".into(),
            vsock_guest_cid: 3,
            lease_file: PathBuf::from("/var/db/dhcpd_leases"),
            start_budget: RetryBudget::new(5, Duration::from_secs(1)),
            ip_budget: RetryBudget::new(60, Duration::from_secs(2)),
            stop_budget: RetryBudget::new(60, Duration::from_secs(2)),
        }
    }
}

impl DriverSettings {
    /// Load settings from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `KITVM_LEASE_FILE` | `/var/db/dhcpd_leases` |
    /// | `KITVM_PROCESS_MATCH` | `hyper` |
    /// | `KITVM_START_ATTEMPTS` | `5` |
    /// | `KITVM_START_DELAY_MS` | `1000` |
    /// | `KITVM_IP_ATTEMPTS` | `60` |
    /// | `KITVM_IP_DELAY_MS` | `2000` |
    /// | `KITVM_STOP_ATTEMPTS` | `60` |
    /// | `KITVM_STOP_DELAY_MS` | `2000` |
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            lease_file: non_empty_env("KITVM_LEASE_FILE")
                .map(PathBuf::from)
                .unwrap_or(default.lease_file),
            process_name_match: non_empty_env("KITVM_PROCESS_MATCH")
                .unwrap_or(default.process_name_match),
            start_budget: budget_from_env("KITVM_START", default.start_budget),
            ip_budget: budget_from_env("KITVM_IP", default.ip_budget),
            stop_budget: budget_from_env("KITVM_STOP", default.stop_budget),
            ..default
        }
    }
}

/// An environment variable that is set and not empty.
fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn budget_from_env(prefix: &str, default: RetryBudget) -> RetryBudget {
    let attempts = std::env::var(format!("{prefix}_ATTEMPTS"))
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default.attempts);
    let delay = std::env::var(format!("{prefix}_DELAY_MS"))
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default.delay);
    RetryBudget { attempts, delay }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = DriverSettings::default();
        assert_eq!(settings.driver_name, "hyperkit");
        assert_eq!(settings.default_cpus, 4);
        assert_eq!(settings.default_memory_mib, 8192);
        assert_eq!(settings.default_ssh_user, "core");
        assert_eq!(settings.pid_file_name, "hyperkit.pid");
        assert_eq!(settings.supported_image_format, "qcow2");
        assert_eq!(settings.vsock_guest_cid, 3);
    }

    #[test]
    fn test_default_budgets() {
        let settings = DriverSettings::default();
        assert_eq!(settings.start_budget, RetryBudget::new(5, Duration::from_secs(1)));
        assert_eq!(settings.ip_budget, RetryBudget::new(60, Duration::from_secs(2)));
        // graceful stop waits up to ~2 minutes
        assert_eq!(settings.stop_budget.max_wait(), Duration::from_secs(118));
    }

    #[test]
    fn test_budget_from_env_overrides() {
        std::env::set_var("KITVM_TEST_BUDGET_ATTEMPTS", "7");
        std::env::set_var("KITVM_TEST_BUDGET_DELAY_MS", "250");
        let budget = budget_from_env("KITVM_TEST_BUDGET", RetryBudget::new(1, Duration::ZERO));
        assert_eq!(budget, RetryBudget::new(7, Duration::from_millis(250)));

        std::env::set_var("KITVM_TEST_BUDGET_ATTEMPTS", "not-a-number");
        let budget = budget_from_env("KITVM_TEST_BUDGET", RetryBudget::new(3, Duration::ZERO));
        assert_eq!(budget.attempts, 3);

        std::env::remove_var("KITVM_TEST_BUDGET_ATTEMPTS");
        std::env::remove_var("KITVM_TEST_BUDGET_DELAY_MS");
    }

    #[test]
    fn test_empty_env_value_is_ignored() {
        std::env::set_var("KITVM_TEST_EMPTY_PATH", "");
        assert_eq!(non_empty_env("KITVM_TEST_EMPTY_PATH"), None);

        std::env::set_var("KITVM_TEST_EMPTY_PATH", "/tmp/leases");
        assert_eq!(non_empty_env("KITVM_TEST_EMPTY_PATH").as_deref(), Some("/tmp/leases"));

        std::env::remove_var("KITVM_TEST_EMPTY_PATH");
        assert_eq!(non_empty_env("KITVM_TEST_EMPTY_PATH"), None);
    }

    #[test]
    fn test_from_env_ignores_empty_lease_file() {
        std::env::set_var("KITVM_LEASE_FILE", "");
        let settings = DriverSettings::from_env();
        std::env::remove_var("KITVM_LEASE_FILE");
        assert_eq!(settings.lease_file, PathBuf::from("/var/db/dhcpd_leases"));
    }
}
