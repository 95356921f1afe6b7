//! Packet record module - the input side of the ingestion pipeline.
//!
//! Records arrive as comma-separated lines produced by an upstream
//! pcap-to-CSV collaborator. The schema is positional and owned upstream;
//! this module only documents and parses the indices the core consumes:
//!
//! | Index | Field |
//! |---|---|
//! | 0 | source address (decimal u32 or dotted quad) |
//! | 1 | destination address |
//! | 2 | IP protocol number |
//! | 4 | destination port (ICMP type/code slot) |
//! | 6 | IP total length |
//! | 10 | epoch timestamp, float seconds |
//! | 13 | TCP flags (TCP only) |

use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RecordError;

pub const FIELD_SRC_ADDR: usize = 0;
pub const FIELD_DST_ADDR: usize = 1;
pub const FIELD_PROTOCOL: usize = 2;
pub const FIELD_DST_PORT: usize = 4;
pub const FIELD_IP_LEN: usize = 6;
pub const FIELD_TIMESTAMP: usize = 10;
pub const FIELD_TCP_FLAGS: usize = 13;

/// IP protocol carried by a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum Protocol {
    Icmp,
    Tcp,
    Udp,
    Other(u8),
}

impl Protocol {
    pub fn number(&self) -> u8 {
        match self {
            Protocol::Icmp => 1,
            Protocol::Tcp => 6,
            Protocol::Udp => 17,
            Protocol::Other(n) => *n,
        }
    }
}

impl From<u8> for Protocol {
    fn from(n: u8) -> Self {
        match n {
            1 => Protocol::Icmp,
            6 => Protocol::Tcp,
            17 => Protocol::Udp,
            other => Protocol::Other(other),
        }
    }
}

impl From<Protocol> for u8 {
    fn from(p: Protocol) -> Self {
        p.number()
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "icmp" => Ok(Protocol::Icmp),
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => other
                .parse::<u8>()
                .map(Protocol::from)
                .map_err(|_| format!("Unknown protocol: {}", s)),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Icmp => write!(f, "ICMP"),
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
            Protocol::Other(n) => write!(f, "PROTO:{}", n),
        }
    }
}

/// The fields of one packet record that the core consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketRecord {
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub protocol: Protocol,
    pub dst_port: u32,
    pub ip_len: u32,
    pub timestamp: f64,
    /// Zero for anything but TCP.
    pub tcp_flags: u32,
}

impl PacketRecord {
    /// Parses one comma-separated line.
    ///
    /// `origin` and `line` only feed error messages.
    pub fn parse(text: &str, origin: &str, line: usize) -> Result<Self, RecordError> {
        let fields: Vec<&str> = text.trim_end().split(',').collect();
        let cursor = FieldCursor {
            fields: &fields,
            origin,
            line,
        };

        let src_addr = cursor.address(FIELD_SRC_ADDR, "saddr")?;
        let dst_addr = cursor.address(FIELD_DST_ADDR, "daddr")?;
        let protocol = Protocol::from(cursor.number::<u8>(FIELD_PROTOCOL, "proto")?);
        let dst_port = cursor.number::<u32>(FIELD_DST_PORT, "dport")?;
        let ip_len = cursor.number::<u32>(FIELD_IP_LEN, "iptotlen")?;
        let timestamp = cursor.number::<f64>(FIELD_TIMESTAMP, "ts_epoch")?;
        if !timestamp.is_finite() {
            return Err(cursor.invalid(FIELD_TIMESTAMP, "ts_epoch"));
        }
        let tcp_flags = if protocol == Protocol::Tcp {
            cursor.number::<u32>(FIELD_TCP_FLAGS, "tcp_flags")?
        } else {
            0
        };

        Ok(Self {
            src_addr,
            dst_addr,
            protocol,
            dst_port,
            ip_len,
            timestamp,
            tcp_flags,
        })
    }

    /// Identifier of the emitting source, optionally suffixed with the
    /// destination port.
    pub fn source_id(&self, split_by_port: bool) -> String {
        if split_by_port {
            format!("{}_{}", self.src_addr, self.dst_port)
        } else {
            self.src_addr.to_string()
        }
    }
}

struct FieldCursor<'a> {
    fields: &'a [&'a str],
    origin: &'a str,
    line: usize,
}

impl FieldCursor<'_> {
    fn raw(&self, index: usize, name: &'static str) -> Result<&str, RecordError> {
        self.fields
            .get(index)
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .ok_or_else(|| RecordError::MissingField {
                origin: self.origin.to_string(),
                line: self.line,
                index,
                name,
            })
    }

    fn invalid(&self, index: usize, name: &'static str) -> RecordError {
        RecordError::InvalidField {
            origin: self.origin.to_string(),
            line: self.line,
            index,
            name,
            value: self.fields.get(index).copied().unwrap_or_default().to_string(),
        }
    }

    fn number<T: FromStr>(&self, index: usize, name: &'static str) -> Result<T, RecordError> {
        self.raw(index, name)?
            .parse::<T>()
            .map_err(|_| self.invalid(index, name))
    }

    /// Upstream writes addresses as big-endian decimal integers.
    fn address(&self, index: usize, name: &'static str) -> Result<Ipv4Addr, RecordError> {
        let raw = self.raw(index, name)?;
        raw.parse::<u32>()
            .map(Ipv4Addr::from)
            .or_else(|_| raw.parse::<Ipv4Addr>())
            .map_err(|_| self.invalid(index, name))
    }
}

/// Maps a packet to the short string its n-gram distribution is built from.
pub type FingerprintFn = fn(&PacketRecord) -> String;

pub fn udp_fingerprint(packet: &PacketRecord) -> String {
    format!("{:04x}{:02x}", packet.dst_port, packet.ip_len)
}

pub fn tcp_fingerprint(packet: &PacketRecord) -> String {
    format!(
        "{:04x}{:02x}{:02x}",
        packet.dst_port, packet.tcp_flags, packet.ip_len
    )
}

pub fn icmp_fingerprint(packet: &PacketRecord) -> String {
    format!("{:02x}{:02x}", packet.dst_port, packet.ip_len)
}
