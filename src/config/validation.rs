//! Configuration validation functions
//!
//! This module provides validation for configuration fields: interface
//! names, addresses, the client subnet and scheduler timing.

use crate::error::{Result, VpnmonError};
use crate::wireguard::client_hosts;
use ipnet::IpNet;
use std::net::IpAddr;

/// Validate interface name (alphanumeric, max 15 chars)
pub fn validate_interface_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(VpnmonError::Config(
            "Interface name cannot be empty".to_string(),
        ));
    }

    if name.len() > 15 {
        return Err(VpnmonError::Config(format!(
            "Interface name '{}' exceeds maximum length of 15 characters",
            name
        )));
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(VpnmonError::Config(format!(
            "Interface name '{}' contains invalid characters (only alphanumeric, '_', and '-' allowed)",
            name
        )));
    }

    Ok(())
}

/// Validate IP address
pub fn validate_ip_address(ip: &str) -> Result<()> {
    ip.parse::<IpAddr>()
        .map_err(|_| VpnmonError::Config(format!("Invalid IP address: {}", ip)))?;
    Ok(())
}

/// Validate CIDR notation (IP/prefix)
pub fn validate_cidr(cidr: &str) -> Result<()> {
    if !cidr.contains('/') {
        return Err(VpnmonError::Config(format!(
            "Invalid CIDR notation: {} (expected format: IP/prefix)",
            cidr
        )));
    }

    cidr.parse::<IpNet>()
        .map_err(|e| VpnmonError::Config(format!("Invalid CIDR notation {}: {}", cidr, e)))?;
    Ok(())
}

/// Validate the client subnet leaves room for at least one client after the server
pub fn validate_subnet(subnet: &IpNet) -> Result<()> {
    if client_hosts(subnet).next().is_none() {
        return Err(VpnmonError::Config(format!(
            "Subnet {} is too small: it needs a server address and at least one client address",
            subnet
        )));
    }
    Ok(())
}

/// Validate the collection interval
pub fn validate_interval(secs: u64) -> Result<()> {
    if secs == 0 {
        return Err(VpnmonError::Config(
            "Scheduler interval must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// Validate keepalive timeout
pub fn validate_keepalive(secs: u16) -> Result<()> {
    // 0 disables keepalive
    if secs > 0 && secs < 10 {
        return Err(VpnmonError::Config(format!(
            "Keepalive interval {} is too short (minimum 10 seconds or 0 to disable)",
            secs
        )));
    }

    if secs > 300 {
        return Err(VpnmonError::Config(format!(
            "Keepalive interval {} is too long (maximum 300 seconds)",
            secs
        )));
    }

    Ok(())
}
