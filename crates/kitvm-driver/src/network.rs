//! Guest address discovery: MAC derivation and DHCP lease lookup.
//!
//! The guest MAC is derived from the machine UUID by the hypervisor's vmnet
//! backend. macOS `bootpd` then records the guest's lease in a lease file,
//! keyed by the MAC with every octet's leading zero stripped.

use crate::error::{DriverError, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Resolves the guest's MAC and IP addresses.
pub trait AddressResolver: Send + Sync {
    /// Derive the guest MAC address from the machine UUID, using the
    /// hypervisor binary at `hypervisor_path`.
    fn mac_for_uuid(&self, hypervisor_path: &Path, uuid: &str) -> Result<String>;

    /// Look up the IP leased to `mac` (already normalized).
    ///
    /// `Ok(None)` means no lease exists yet.
    fn ip_for_mac(&self, mac: &str) -> Result<Option<String>>;
}

/// Strip the leading zero of every octet of a colon-separated MAC.
///
/// `"02:1a:0b:cc:00:5e"` becomes `"2:1a:b:cc:0:5e"`, the form used by the
/// lease file.
pub fn trim_mac_address(mac: &str) -> String {
    mac.split(':')
        .map(|octet| {
            octet
                .strip_prefix('0')
                .filter(|rest| !rest.is_empty())
                .unwrap_or(octet)
        })
        .collect::<Vec<_>>()
        .join(":")
}

/// A single block of the DHCP lease file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DhcpLease {
    /// Host name the guest announced
    pub name: String,
    /// Leased IP address
    pub ip_address: String,
    /// Hardware address without its type prefix
    pub hw_address: String,
    /// Lease expiry, as written by bootpd
    pub lease: String,
}

/// Parse the contents of a `bootpd` lease file.
///
/// Blocks look like:
///
/// ```text
/// {
///     name=crc
///     ip_address=192.168.64.2
///     hw_address=1,2:1a:b:cc:0:5e
///     identifier=1,2:1a:b:cc:0:5e
///     lease=0x5c8e6f1f
/// }
/// ```
pub fn parse_leases(content: &str) -> Vec<DhcpLease> {
    let mut leases = Vec::new();
    let mut current: Option<DhcpLease> = None;

    for line in content.lines().map(str::trim) {
        match line {
            "{" => current = Some(DhcpLease::default()),
            "}" => {
                if let Some(lease) = current.take() {
                    leases.push(lease);
                }
            }
            _ => {
                let (Some(lease), Some((key, value))) = (current.as_mut(), line.split_once('='))
                else {
                    continue;
                };
                match key {
                    "name" => lease.name = value.to_string(),
                    "ip_address" => lease.ip_address = value.to_string(),
                    "hw_address" => {
                        // strip the "<hardware type>," prefix
                        let mac = value.split_once(',').map_or(value, |(_, mac)| mac);
                        lease.hw_address = mac.to_string();
                    }
                    "lease" => lease.lease = value.to_string(),
                    _ => {}
                }
            }
        }
    }

    leases
}

/// Find the IP leased to `mac` in lease file contents.
pub fn find_ip_in_leases(content: &str, mac: &str) -> Option<String> {
    parse_leases(content)
        .into_iter()
        .find(|lease| lease.hw_address.eq_ignore_ascii_case(mac))
        .map(|lease| lease.ip_address)
}

/// Extract the address from the hypervisor's `MAC: xx:xx:..` probe output.
pub fn parse_mac_probe_output(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("MAC:"))
        .map(|mac| mac.trim().to_string())
        .filter(|mac| !mac.is_empty())
}

/// Resolver backed by the hypervisor's MAC probe and the bootpd lease file.
#[derive(Debug, Clone)]
pub struct LeaseFileResolver {
    lease_file: PathBuf,
}

impl LeaseFileResolver {
    /// Create a resolver reading leases from `lease_file`.
    pub fn new(lease_file: impl Into<PathBuf>) -> Self {
        Self {
            lease_file: lease_file.into(),
        }
    }
}

impl AddressResolver for LeaseFileResolver {
    fn mac_for_uuid(&self, hypervisor_path: &Path, uuid: &str) -> Result<String> {
        let output = Command::new(hypervisor_path)
            .args(["-M", "-s", "0:0,hostbridge", "-s", "31,lpc", "-s", "1:0,virtio-net"])
            .args(["-U", uuid])
            .args(["-f", "kexec,/dev/null,/dev/null,"])
            .output()
            .map_err(|e| {
                DriverError::Resolver(format!(
                    "running {} for MAC probe: {e}",
                    hypervisor_path.display()
                ))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_mac_probe_output(&stdout).ok_or_else(|| {
            DriverError::Resolver(format!(
                "no MAC in probe output for uuid {uuid} (exit {}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        })
    }

    fn ip_for_mac(&self, mac: &str) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.lease_file) {
            Ok(content) => Ok(find_ip_in_leases(&content, mac)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DriverError::Resolver(format!(
                "reading {}: {e}",
                self.lease_file.display()
            ))),
        }
    }
}
