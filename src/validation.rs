//! Small validators used by `HubConfig::validate`.

use std::net::{IpAddr, Ipv4Addr};
use std::ops::RangeInclusive;

/// Validates if a given u16 value is a usable port number.
/// By type, the port is already within the 0-65535 range.
/// This function checks that the port is not 0, which is reserved.
///
/// # Arguments
///
/// * `port` - The u16 value to validate.
///
/// # Returns
///
/// * `Ok(())` if the port is valid.
/// * `Err(&'static str)` if the port is invalid.
pub fn is_valid_port(port: u16) -> Result<(), &'static str> {
    if port > 0 {
        Ok(())
    } else {
        Err("Port number must be greater than 0")
    }
}

/// Validates a host given either as an IP address or as a DNS name.
///
/// # Arguments
///
/// * `host` - The string to validate.
///
/// # Returns
///
/// * `Ok(())` if the host looks usable.
/// * `Err(&'static str)` otherwise.
pub fn is_valid_host(host: &str) -> Result<(), &'static str> {
    if host.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    if host.is_empty() || host.len() > 253 {
        return Err("Host name must be between 1 and 253 characters");
    }
    let labels_ok = host.split('.').all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    });
    if labels_ok {
        Ok(())
    } else {
        Err("Invalid host name")
    }
}

/// Validates that an address is an IPv4 multicast group.
pub fn is_multicast_group(address: &str) -> Result<(), &'static str> {
    match address.parse::<Ipv4Addr>() {
        Ok(ip) if ip.is_multicast() => Ok(()),
        Ok(_) => Err("Address is not in the multicast range 224.0.0.0/4"),
        Err(_) => Err("Invalid IPv4 address"),
    }
}

/// Validates if a given string is a valid file path.
///
/// # Arguments
///
/// * `path` - The string to validate.
///
/// # Returns
///
/// * `Ok(())` if the file path is valid.
/// * `Err(&'static str)` if the file path is invalid.
pub fn is_valid_path(path: &str) -> Result<(), &'static str> {
    if path.is_empty() {
        return Err("File path cannot be empty");
    }
    if path.contains('\0') {
        return Err("File path cannot contain null bytes");
    }
    Ok(())
}

/// Validates if a given value is within a specified numeric range.
///
/// # Arguments
///
/// * `value` - The value to validate.
/// * `range` - The inclusive range to validate against.
///
/// # Returns
///
/// * `Ok(())` if the value is within the range.
/// * `Err(&'static str)` if the value is outside the range.
pub fn is_in_range<T: PartialOrd>(value: T, range: RangeInclusive<T>) -> Result<(), &'static str> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err("Value is outside the specified range")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ports() {
        assert!(is_valid_port(4243).is_ok());
        assert!(is_valid_port(0).is_err());
    }

    #[test]
    fn hosts() {
        assert!(is_valid_host("localhost").is_ok());
        assert!(is_valid_host("127.0.0.1").is_ok());
        assert!(is_valid_host("::1").is_ok());
        assert!(is_valid_host("hub-01.lab.example").is_ok());
        assert!(is_valid_host("").is_err());
        assert!(is_valid_host("bad host").is_err());
        assert!(is_valid_host("-leading.example").is_err());
    }

    #[test]
    fn multicast_groups() {
        assert!(is_multicast_group("224.21.12.68").is_ok());
        assert!(is_multicast_group("192.168.1.1").is_err());
        assert!(is_multicast_group("nope").is_err());
    }

    #[test]
    fn paths_and_ranges() {
        assert!(is_valid_path("log.xio.gz").is_ok());
        assert!(is_valid_path("").is_err());
        assert!(is_in_range(0.5, 0.0..=1.0).is_ok());
        assert!(is_in_range(1.5, 0.0..=1.0).is_err());
    }
}
