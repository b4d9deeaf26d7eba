//! Interface selection for multicast.
//!
//! Precedence: forced interface name, then the first interface with an
//! address inside the configured CIDR, then the first non-loopback IPv4.
//! No usable interface is a hard startup error.

use std::net::Ipv4Addr;

use lw_core::{LwError, LwResult};

#[derive(Debug, Clone)]
pub struct IfacePick {
    pub name: String,
    pub ip: Ipv4Addr,
    /// Which rule selected it (for the startup log line)
    pub by: PickRule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickRule {
    ForcedName,
    Cidr,
    FirstIpv4,
}

pub fn pick_interface(forced_name: Option<&str>, subnet: Option<&str>) -> LwResult<IfacePick> {
    let ifaces = if_addrs::get_if_addrs()
        .map_err(|e| LwError::Config(format!("interface enumeration failed: {e}")))?;
    pick_from(&ifaces, forced_name, subnet)
}

fn pick_from(
    ifaces: &[if_addrs::Interface],
    forced_name: Option<&str>,
    subnet: Option<&str>,
) -> LwResult<IfacePick> {
    if let Some(name) = forced_name {
        return ifaces
            .iter()
            .filter(|i| i.name == name)
            .find_map(|i| ipv4_of(i).map(|ip| (i.name.clone(), ip)))
            .map(|(name, ip)| IfacePick { name, ip, by: PickRule::ForcedName })
            .ok_or_else(|| LwError::Config(format!("interface {name} has no IPv4 address")));
    }

    if let Some(cidr) = subnet {
        let (net, prefix) = parse_cidr(cidr)?;
        if let Some(pick) = ifaces.iter().find_map(|i| {
            let ip = ipv4_of(i)?;
            cidr_contains(net, prefix, ip).then(|| IfacePick {
                name: i.name.clone(),
                ip,
                by: PickRule::Cidr,
            })
        }) {
            return Ok(pick);
        }
    }

    ifaces
        .iter()
        .filter(|i| !i.is_loopback())
        .find_map(|i| {
            ipv4_of(i).map(|ip| IfacePick {
                name: i.name.clone(),
                ip,
                by: PickRule::FirstIpv4,
            })
        })
        .ok_or_else(|| LwError::Config("no suitable IPv4 interface found".into()))
}

fn ipv4_of(iface: &if_addrs::Interface) -> Option<Ipv4Addr> {
    match iface.ip() {
        std::net::IpAddr::V4(v4) => Some(v4),
        std::net::IpAddr::V6(_) => None,
    }
}

fn parse_cidr(cidr: &str) -> LwResult<(Ipv4Addr, u8)> {
    let (net_str, prefix_str) = cidr
        .split_once('/')
        .ok_or_else(|| LwError::Config(format!("malformed CIDR: {cidr}")))?;
    let net: Ipv4Addr = net_str
        .parse()
        .map_err(|_| LwError::Config(format!("malformed CIDR address: {cidr}")))?;
    let prefix: u8 = prefix_str
        .parse()
        .ok()
        .filter(|p| *p <= 32)
        .ok_or_else(|| LwError::Config(format!("malformed CIDR prefix: {cidr}")))?;
    Ok((net, prefix))
}

fn cidr_contains(net: Ipv4Addr, prefix: u8, ip: Ipv4Addr) -> bool {
    if prefix == 0 {
        return true;
    }
    let mask = u32::MAX << (32 - prefix as u32);
    (u32::from(net) & mask) == (u32::from(ip) & mask)
}
