use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;

use crate::error::{Error, Result};

/// Textual server configuration, as stored on disk or handed over by the
/// access-point bring-up code.
///
/// Every address is a dotted-quad string and is only parsed by
/// [`Config::resolve`], so a bad value surfaces as a start-time error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server_address: String,
    pub gateway: String,
    pub netmask: String,
    pub dns_primary: String,
    /// Empty string means no secondary DNS server.
    pub dns_secondary: String,
    pub pool_start: String,
    pub pool_end: String,
    pub lease_seconds: u32,
    /// Keep released bindings so a returning station gets its old address.
    pub retain_released: bool,
    /// Upper bound on bindings held across both lists.
    pub max_leases: usize,
    pub server_port: u16,
    pub client_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_address: "192.168.2.1".to_string(),
            gateway: "192.168.2.1".to_string(),
            netmask: "255.255.255.0".to_string(),
            dns_primary: "8.8.8.8".to_string(),
            dns_secondary: "192.168.2.1".to_string(),
            pool_start: "192.168.2.2".to_string(),
            pool_end: "192.168.2.5".to_string(),
            lease_seconds: 86400,
            retain_released: true,
            max_leases: 32,
            server_port: 67,
            client_port: 68,
        }
    }
}

/// Immutable, validated snapshot taken by `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub server_address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub dns_primary: Ipv4Addr,
    pub dns_secondary: Ipv4Addr,
    pub pool_start: Ipv4Addr,
    pub pool_end: Ipv4Addr,
    pub lease_seconds: u32,
    pub retain_released: bool,
    pub max_leases: usize,
    pub server_port: u16,
    pub client_port: u16,
}

impl Config {
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)?;
            config.resolve()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Parses every address and checks the invariants the allocator relies on.
    pub fn resolve(&self) -> Result<ServerConfig> {
        let resolved = ServerConfig {
            server_address: parse_address("server_address", &self.server_address)?,
            netmask: parse_address("netmask", &self.netmask)?,
            gateway: parse_address("gateway", &self.gateway)?,
            dns_primary: parse_address("dns_primary", &self.dns_primary)?,
            dns_secondary: if self.dns_secondary.trim().is_empty() {
                Ipv4Addr::UNSPECIFIED
            } else {
                parse_address("dns_secondary", &self.dns_secondary)?
            },
            pool_start: parse_address("pool_start", &self.pool_start)?,
            pool_end: parse_address("pool_end", &self.pool_end)?,
            lease_seconds: self.lease_seconds,
            retain_released: self.retain_released,
            max_leases: self.max_leases,
            server_port: self.server_port,
            client_port: self.client_port,
        };

        resolved.validate()?;
        Ok(resolved)
    }
}

fn parse_address(field: &str, value: &str) -> Result<Ipv4Addr> {
    value.trim().parse().map_err(|_| {
        Error::InvalidConfig(format!("{} is not a dotted-quad address: {:?}", field, value))
    })
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if !is_contiguous_mask(self.netmask) {
            return Err(Error::InvalidConfig(format!(
                "netmask {} is not a contiguous mask",
                self.netmask
            )));
        }

        if !self.same_subnet(self.gateway, self.pool_start) {
            return Err(Error::InvalidConfig(format!(
                "gateway {} is not on the subnet of pool_start {}",
                self.gateway, self.pool_start
            )));
        }

        if !self.same_subnet(self.pool_start, self.pool_end) {
            return Err(Error::InvalidConfig(format!(
                "pool_start {} and pool_end {} are on different subnets",
                self.pool_start, self.pool_end
            )));
        }

        if u32::from(self.pool_start) > u32::from(self.pool_end) {
            return Err(Error::InvalidConfig(
                "pool_start must be less than or equal to pool_end".to_string(),
            ));
        }

        if self.lease_seconds == 0 {
            return Err(Error::InvalidConfig(
                "lease_seconds must be greater than 0".to_string(),
            ));
        }

        if self.max_leases == 0 {
            return Err(Error::InvalidConfig(
                "max_leases must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn same_subnet(&self, a: Ipv4Addr, b: Ipv4Addr) -> bool {
        let mask = u32::from(self.netmask);
        u32::from(a) & mask == u32::from(b) & mask
    }

    pub fn pool_size(&self) -> u32 {
        u32::from(self.pool_end) - u32::from(self.pool_start) + 1
    }

    /// Renewal timer T1, half the lease.
    pub fn renewal_seconds(&self) -> u32 {
        self.lease_seconds / 2
    }

    /// Rebinding timer T2, seven eighths of the lease.
    pub fn rebinding_seconds(&self) -> u32 {
        ((self.lease_seconds as u64 * 7) / 8) as u32
    }
}

/// True when the mask is a run of ones followed by a run of zeros.
pub fn is_contiguous_mask(mask: Ipv4Addr) -> bool {
    let bits = u32::from(mask);
    bits.leading_ones() + bits.trailing_zeros() == 32
}
