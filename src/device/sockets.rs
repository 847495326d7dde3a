use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6};
use std::path::PathBuf;

use serde::Serialize;

use crate::{Error, Result};

/// A networked (tcp/udp, v4/v6) socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InetSocket {
    pub protocol: String,
    pub local_address: IpAddr,
    pub local_port: u16,
    pub remote_address: IpAddr,
    pub remote_port: u16,
    pub state: u8,
    pub uid: u32,
    pub transmit_queue: u64,
    pub receive_queue: u64,
    pub inode: u64,
}

/// A unix-domain socket, keyed by its path (abstract names start with `@`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnixSocket {
    pub ref_count: u32,
    pub protocol: u32,
    pub flags: u32,
    #[serde(rename = "type")]
    pub socket_type: u16,
    pub state: u8,
    pub inode: u64,
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum SocketRecord {
    Inet(InetSocket),
    Unix(UnixSocket),
}

/// Snapshot source for the socket table and interface addresses.
pub trait SocketTable: Send + Sync {
    /// Every inet and unix socket, in table order.
    fn current_sockets(&self) -> Result<Vec<SocketRecord>>;

    /// Unix-domain sockets only, in table order.
    fn unix_sockets(&self) -> Result<Vec<UnixSocket>>;

    fn local_interface_addresses(&self) -> Result<BTreeMap<String, Vec<IpAddr>>>;
}

const INET_TABLES: [(&str, bool); 4] = [("tcp", false), ("tcp6", true), ("udp", false), ("udp6", true)];

/// Reads `/proc/net/*` tables and `getifaddrs`.
pub struct ProcSocketTable {
    root: PathBuf,
}

impl Default for ProcSocketTable {
    fn default() -> Self {
        Self::new("/proc/net")
    }
}

impl ProcSocketTable {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_table(&self, name: &str) -> Option<String> {
        std::fs::read_to_string(self.root.join(name)).ok()
    }
}

impl SocketTable for ProcSocketTable {
    fn current_sockets(&self) -> Result<Vec<SocketRecord>> {
        let mut records = Vec::new();
        let mut readable = 0;

        for (name, v6) in INET_TABLES {
            let Some(text) = self.read_table(name) else { continue };
            readable += 1;
            records.extend(parse_inet_table(&text, name, v6).into_iter().map(SocketRecord::Inet));
        }
        if let Some(text) = self.read_table("unix") {
            readable += 1;
            records.extend(parse_unix_table(&text).into_iter().map(SocketRecord::Unix));
        }

        if readable == 0 {
            return Err(Error::IntrospectionUnavailable(format!(
                "no socket tables readable under {}",
                self.root.display()
            )));
        }
        Ok(records)
    }

    fn unix_sockets(&self) -> Result<Vec<UnixSocket>> {
        let path = self.root.join("unix");
        let text = std::fs::read_to_string(&path).map_err(|e| {
            Error::IntrospectionUnavailable(format!("{}: {}", path.display(), e))
        })?;
        Ok(parse_unix_table(&text))
    }

    fn local_interface_addresses(&self) -> Result<BTreeMap<String, Vec<IpAddr>>> {
        interface_addresses()
    }
}

/// Enumerate interface addresses with `getifaddrs`.
pub fn interface_addresses() -> Result<BTreeMap<String, Vec<IpAddr>>> {
    let addrs = nix::ifaddrs::getifaddrs()
        .map_err(|e| Error::IntrospectionUnavailable(format!("getifaddrs: {}", e)))?;

    let mut out: BTreeMap<String, Vec<IpAddr>> = BTreeMap::new();
    for ifaddr in addrs {
        let entry = out.entry(ifaddr.interface_name.clone()).or_default();
        let Some(storage) = ifaddr.address else { continue };
        if let Some(sin) = storage.as_sockaddr_in() {
            entry.push(IpAddr::V4(*SocketAddrV4::from(*sin).ip()));
        } else if let Some(sin6) = storage.as_sockaddr_in6() {
            entry.push(IpAddr::V6(*SocketAddrV6::from(*sin6).ip()));
        }
    }
    Ok(out)
}

/// Parse `/proc/net/unix`:
/// `Num RefCount Protocol Flags Type St Inode Path`.
pub fn parse_unix_table(text: &str) -> Vec<UnixSocket> {
    text.lines().skip(1).filter_map(parse_unix_line).collect()
}

fn parse_unix_line(line: &str) -> Option<UnixSocket> {
    let mut fields = line.split_whitespace();
    let _num = fields.next()?;
    let ref_count = u32::from_str_radix(fields.next()?, 16).ok()?;
    let protocol = u32::from_str_radix(fields.next()?, 16).ok()?;
    let flags = u32::from_str_radix(fields.next()?, 16).ok()?;
    let socket_type = u16::from_str_radix(fields.next()?, 16).ok()?;
    let state = u8::from_str_radix(fields.next()?, 16).ok()?;
    let inode = fields.next()?.parse().ok()?;
    let rest: Vec<&str> = fields.collect();
    let path = if rest.is_empty() { None } else { Some(rest.join(" ")) };

    Some(UnixSocket { ref_count, protocol, flags, socket_type, state, inode, path })
}

/// Parse `/proc/net/{tcp,tcp6,udp,udp6}`.
pub fn parse_inet_table(text: &str, protocol: &str, v6: bool) -> Vec<InetSocket> {
    text.lines()
        .skip(1)
        .filter_map(|line| parse_inet_line(line, protocol, v6))
        .collect()
}

fn parse_inet_line(line: &str, protocol: &str, v6: bool) -> Option<InetSocket> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 10 {
        return None;
    }
    let (local_address, local_port) = parse_endpoint(fields[1], v6)?;
    let (remote_address, remote_port) = parse_endpoint(fields[2], v6)?;
    let state = u8::from_str_radix(fields[3], 16).ok()?;
    let (tx, rx) = fields[4].split_once(':')?;

    Some(InetSocket {
        protocol: protocol.to_string(),
        local_address,
        local_port,
        remote_address,
        remote_port,
        state,
        transmit_queue: u64::from_str_radix(tx, 16).ok()?,
        receive_queue: u64::from_str_radix(rx, 16).ok()?,
        uid: fields[7].parse().ok()?,
        inode: fields[9].parse().ok()?,
    })
}

/// `0100007F:13AD` → 127.0.0.1:5037. Address words are host-order
/// (little-endian) hex; the port is big-endian hex.
fn parse_endpoint(text: &str, v6: bool) -> Option<(IpAddr, u16)> {
    let (addr, port) = text.split_once(':')?;
    let port = u16::from_str_radix(port, 16).ok()?;
    let addr = if v6 {
        if addr.len() != 32 {
            return None;
        }
        let mut bytes = [0u8; 16];
        for (i, chunk) in bytes.chunks_mut(4).enumerate() {
            let word = u32::from_str_radix(&addr[i * 8..i * 8 + 8], 16).ok()?;
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        IpAddr::V6(Ipv6Addr::from(bytes))
    } else {
        let word = u32::from_str_radix(addr, 16).ok()?;
        IpAddr::V4(Ipv4Addr::from(word.to_le_bytes()))
    };
    Some((addr, port))
}
