//! Network interface discovery.
//!
//! Resolves the two pieces of host networking the server needs before it can
//! start: the routable IPv4 address to advertise to clients, and the name of
//! the interface the DHCP proxy binds to.

use std::net::{IpAddr, Ipv4Addr};

use tracing::debug;

use crate::error::PxeError;

/// Discovers the advertise address when none was given explicitly.
///
/// The host must carry exactly one routable IPv4 address; zero or several is
/// an error because the address is embedded into the patched iPXE binaries
/// and must be reachable by every client.
pub fn discover_advertise_address() -> Result<Ipv4Addr, PxeError> {
    let candidates = routable_addresses()?;

    pick_single_routable(&candidates)
}

/// Resolves the DHCP proxy interface selector to an interface name.
///
/// The selector is either an interface name, used directly, or an IPv4
/// address, mapped to the interface that carries it.
pub fn resolve_interface(selector: &str) -> Result<String, PxeError> {
    if selector.is_empty() {
        return Err(PxeError::InterfaceResolution(
            "interface selector is empty".to_string(),
        ));
    }

    let interfaces = if_addrs::get_if_addrs()?;

    if interfaces.iter().any(|iface| iface.name == selector) {
        return Ok(selector.to_string());
    }

    let ip: Ipv4Addr = selector.parse().map_err(|_| {
        PxeError::InterfaceResolution(format!(
            "{selector:?} is neither an interface name nor an IPv4 address"
        ))
    })?;

    interfaces
        .iter()
        .find(|iface| iface.ip() == IpAddr::V4(ip))
        .map(|iface| iface.name.clone())
        .ok_or_else(|| {
            PxeError::InterfaceResolution(format!("no interface carries the address {ip}"))
        })
}

fn routable_addresses() -> Result<Vec<(String, Ipv4Addr)>, PxeError> {
    let mut candidates = Vec::new();

    for iface in if_addrs::get_if_addrs()? {
        if iface.is_loopback() {
            continue;
        }

        if let IpAddr::V4(ip) = iface.ip() {
            if !ip.is_link_local() && !ip.is_unspecified() {
                debug!(interface = %iface.name, address = %ip, "routable address candidate");
                candidates.push((iface.name, ip));
            }
        }
    }

    Ok(candidates)
}

fn pick_single_routable(candidates: &[(String, Ipv4Addr)]) -> Result<Ipv4Addr, PxeError> {
    match candidates {
        [] => Err(PxeError::AddressDiscovery(
            "no routable IPv4 address found on any interface".to_string(),
        )),
        [(_, ip)] => Ok(*ip),
        _ => {
            let list = candidates
                .iter()
                .map(|(name, ip)| format!("{ip} ({name})"))
                .collect::<Vec<_>>()
                .join(", ");

            Err(PxeError::AddressDiscovery(format!(
                "multiple routable IPv4 addresses found ({list}), set the advertise address explicitly"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_single_routable() {
        let candidates = vec![("eth0".to_string(), Ipv4Addr::new(10, 0, 0, 5))];

        assert_eq!(
            pick_single_routable(&candidates).unwrap(),
            Ipv4Addr::new(10, 0, 0, 5)
        );
    }

    #[test]
    fn test_pick_single_routable_rejects_empty() {
        let err = pick_single_routable(&[]).unwrap_err();

        assert!(matches!(err, PxeError::AddressDiscovery(_)));
    }

    #[test]
    fn test_pick_single_routable_rejects_ambiguity() {
        let candidates = vec![
            ("eth0".to_string(), Ipv4Addr::new(10, 0, 0, 5)),
            ("eth1".to_string(), Ipv4Addr::new(192, 168, 1, 7)),
        ];

        let err = pick_single_routable(&candidates).unwrap_err();

        match err {
            PxeError::AddressDiscovery(message) => {
                assert!(message.contains("10.0.0.5"));
                assert!(message.contains("192.168.1.7"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_resolve_interface_rejects_garbage_selector() {
        let err = resolve_interface("not-an-interface-or-ip").unwrap_err();

        assert!(matches!(err, PxeError::InterfaceResolution(_)));
    }
}
