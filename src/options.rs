//! DHCP options as defined in RFC 2132.
//!
//! DHCP uses options to convey configuration parameters between servers and clients.
//! Each option has a code (1 byte), length (1 byte), and variable-length data.
//!
//! This module implements parsing and encoding for the options an access-point
//! server exchanges with its stations. Unknown options are preserved as
//! [`DhcpOption::Unknown`] so a decoded message re-encodes unchanged.
//!
//! Replies are assembled with [`OptionWriter`], which writes into the fixed
//! option area of a message and refuses to grow past it.
//!
//! # References
//!
//! - RFC 2132: DHCP Options and BOOTP Vendor Extensions

use std::net::Ipv4Addr;

use crate::error::{Error, Result};

/// Size of the option area that follows the magic cookie.
pub const OPTIONS_SIZE: usize = 308;

/// Options have a 1-byte length field, so a value holds at most 255 bytes
/// (63 addresses in a Router or DNS Server list).
const MAX_OPTION_VALUE: usize = u8::MAX as usize;

/// DHCP option codes as defined in RFC 2132.
///
/// Only codes used by this implementation are defined; unknown codes
/// are handled via [`DhcpOption::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OptionCode {
    /// Padding (no operation). Used for alignment.
    Pad = 0,
    /// Subnet mask (RFC 2132 §3.3).
    SubnetMask = 1,
    /// Router/gateway addresses (RFC 2132 §3.5).
    Router = 3,
    /// DNS server addresses (RFC 2132 §3.8).
    DnsServer = 6,
    /// Broadcast address (RFC 2132 §5.3).
    BroadcastAddress = 28,
    /// Requested IP address (RFC 2132 §9.1).
    RequestedIpAddress = 50,
    /// IP address lease time in seconds (RFC 2132 §9.2).
    LeaseTime = 51,
    /// DHCP message type (RFC 2132 §9.6).
    MessageType = 53,
    /// Server identifier (RFC 2132 §9.7).
    ServerIdentifier = 54,
    /// Human-readable error text, carried on NAK (RFC 2132 §9.9).
    Message = 56,
    /// Renewal time T1 (RFC 2132 §9.11).
    RenewalTime = 58,
    /// Rebinding time T2 (RFC 2132 §9.12).
    RebindingTime = 59,
    /// End of options marker.
    End = 255,
}

impl TryFrom<u8> for OptionCode {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pad),
            1 => Ok(Self::SubnetMask),
            3 => Ok(Self::Router),
            6 => Ok(Self::DnsServer),
            28 => Ok(Self::BroadcastAddress),
            50 => Ok(Self::RequestedIpAddress),
            51 => Ok(Self::LeaseTime),
            53 => Ok(Self::MessageType),
            54 => Ok(Self::ServerIdentifier),
            56 => Ok(Self::Message),
            58 => Ok(Self::RenewalTime),
            59 => Ok(Self::RebindingTime),
            255 => Ok(Self::End),
            other => Err(other),
        }
    }
}

/// DHCP message types (Option 53) as defined in RFC 2132 §9.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Client broadcast to locate servers.
    Discover = 1,
    /// Server response to DISCOVER with IP offer.
    Offer = 2,
    /// Client request for offered parameters.
    Request = 3,
    /// Client indicates address is already in use.
    Decline = 4,
    /// Server acknowledgement with configuration.
    Ack = 5,
    /// Server negative acknowledgement.
    Nak = 6,
    /// Client releases IP address.
    Release = 7,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Discover),
            2 => Ok(Self::Offer),
            3 => Ok(Self::Request),
            4 => Ok(Self::Decline),
            5 => Ok(Self::Ack),
            6 => Ok(Self::Nak),
            7 => Ok(Self::Release),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discover => write!(f, "DISCOVER"),
            Self::Offer => write!(f, "OFFER"),
            Self::Request => write!(f, "REQUEST"),
            Self::Decline => write!(f, "DECLINE"),
            Self::Ack => write!(f, "ACK"),
            Self::Nak => write!(f, "NAK"),
            Self::Release => write!(f, "RELEASE"),
        }
    }
}

/// A parsed DHCP option.
///
/// Each variant corresponds to a specific option code from RFC 2132.
/// Unknown options, message-type values outside 1..=7 and requested
/// addresses of the wrong length are preserved as [`Unknown`](Self::Unknown).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpOption {
    /// Subnet mask (Option 1).
    SubnetMask(Ipv4Addr),
    /// Router/gateway addresses (Option 3). First address is the default gateway.
    Router(Vec<Ipv4Addr>),
    /// DNS server addresses (Option 6).
    DnsServer(Vec<Ipv4Addr>),
    /// Broadcast address (Option 28).
    BroadcastAddress(Ipv4Addr),
    /// Client's requested IP address (Option 50).
    RequestedIpAddress(Ipv4Addr),
    /// Lease time in seconds (Option 51).
    LeaseTime(u32),
    /// DHCP message type (Option 53).
    MessageType(MessageType),
    /// Server identifier - IP of the DHCP server (Option 54).
    ServerIdentifier(Ipv4Addr),
    /// Human-readable message (Option 56).
    Message(String),
    /// Renewal time T1 in seconds (Option 58).
    RenewalTime(u32),
    /// Rebinding time T2 in seconds (Option 59).
    RebindingTime(u32),
    /// Unknown option with raw code and data.
    Unknown(u8, Vec<u8>),
}

fn parse_address(data: &[u8], what: &str) -> Result<Ipv4Addr> {
    match data {
        [a, b, c, d] => Ok(Ipv4Addr::new(*a, *b, *c, *d)),
        _ => Err(Error::InvalidPacket(format!("Invalid {} length", what))),
    }
}

fn parse_address_list(data: &[u8], what: &str) -> Result<Vec<Ipv4Addr>> {
    if !data.len().is_multiple_of(4) || data.is_empty() {
        return Err(Error::InvalidPacket(format!("Invalid {} option length", what)));
    }
    Ok(data
        .chunks_exact(4)
        .map(|chunk| Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]))
        .collect())
}

fn parse_seconds(data: &[u8], what: &str) -> Result<u32> {
    match data {
        [a, b, c, d] => Ok(u32::from_be_bytes([*a, *b, *c, *d])),
        _ => Err(Error::InvalidPacket(format!("Invalid {} length", what))),
    }
}

impl DhcpOption {
    /// Builds the DNS option for a primary and optional secondary server.
    ///
    /// A zero secondary is left out, so the option carries 4 or 8 bytes.
    pub fn dns_servers(primary: Ipv4Addr, secondary: Ipv4Addr) -> Self {
        if secondary.is_unspecified() {
            Self::DnsServer(vec![primary])
        } else {
            Self::DnsServer(vec![primary, secondary])
        }
    }

    /// Returns the RFC 2132 option code for this option.
    pub fn option_code(&self) -> u8 {
        match self {
            Self::SubnetMask(_) => OptionCode::SubnetMask as u8,
            Self::Router(_) => OptionCode::Router as u8,
            Self::DnsServer(_) => OptionCode::DnsServer as u8,
            Self::BroadcastAddress(_) => OptionCode::BroadcastAddress as u8,
            Self::RequestedIpAddress(_) => OptionCode::RequestedIpAddress as u8,
            Self::LeaseTime(_) => OptionCode::LeaseTime as u8,
            Self::MessageType(_) => OptionCode::MessageType as u8,
            Self::ServerIdentifier(_) => OptionCode::ServerIdentifier as u8,
            Self::Message(_) => OptionCode::Message as u8,
            Self::RenewalTime(_) => OptionCode::RenewalTime as u8,
            Self::RebindingTime(_) => OptionCode::RebindingTime as u8,
            Self::Unknown(code, _) => *code,
        }
    }

    /// Parses a DHCP option from its code and raw data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] if the data length is invalid for
    /// the option type (e.g., subnet mask must be exactly 4 bytes).
    pub fn parse(code: u8, data: &[u8]) -> Result<Self> {
        match OptionCode::try_from(code) {
            Ok(OptionCode::SubnetMask) => Ok(Self::SubnetMask(parse_address(data, "subnet mask")?)),
            Ok(OptionCode::Router) => Ok(Self::Router(parse_address_list(data, "router")?)),
            Ok(OptionCode::DnsServer) => {
                Ok(Self::DnsServer(parse_address_list(data, "DNS server")?))
            }
            Ok(OptionCode::BroadcastAddress) => Ok(Self::BroadcastAddress(parse_address(
                data,
                "broadcast address",
            )?)),
            // A bad-length requested address is kept raw instead of failing
            // the message: the station still gets an answer, and the option
            // still counts as present.
            Ok(OptionCode::RequestedIpAddress) => {
                match parse_address(data, "requested IP address") {
                    Ok(addr) => Ok(Self::RequestedIpAddress(addr)),
                    Err(_) => Ok(Self::Unknown(code, data.to_vec())),
                }
            }
            Ok(OptionCode::LeaseTime) => Ok(Self::LeaseTime(parse_seconds(data, "lease time")?)),
            Ok(OptionCode::MessageType) => {
                if data.len() != 1 {
                    return Err(Error::InvalidPacket(
                        "Invalid message type length".to_string(),
                    ));
                }
                match MessageType::try_from(data[0]) {
                    Ok(msg_type) => Ok(Self::MessageType(msg_type)),
                    Err(_) => Ok(Self::Unknown(code, data.to_vec())),
                }
            }
            Ok(OptionCode::ServerIdentifier) => Ok(Self::ServerIdentifier(parse_address(
                data,
                "server identifier",
            )?)),
            Ok(OptionCode::Message) => Ok(Self::Message(String::from_utf8_lossy(data).to_string())),
            Ok(OptionCode::RenewalTime) => {
                Ok(Self::RenewalTime(parse_seconds(data, "renewal time")?))
            }
            Ok(OptionCode::RebindingTime) => {
                Ok(Self::RebindingTime(parse_seconds(data, "rebinding time")?))
            }
            Ok(OptionCode::Pad) | Ok(OptionCode::End) => Err(Error::InvalidPacket(
                "Pad/End should not be parsed as options".to_string(),
            )),
            Err(unknown_code) => Ok(Self::Unknown(unknown_code, data.to_vec())),
        }
    }

    /// Encodes the option to its wire format (code + length + data).
    ///
    /// Numeric values are written most-significant byte first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OptionOverflow`] if the value is longer than the
    /// 255 bytes a length octet can describe (64 or more addresses in a
    /// list, or an over-long message or raw value).
    pub fn encode(&self) -> Result<Vec<u8>> {
        let value = match self {
            Self::SubnetMask(addr)
            | Self::BroadcastAddress(addr)
            | Self::RequestedIpAddress(addr)
            | Self::ServerIdentifier(addr) => addr.octets().to_vec(),
            Self::Router(addrs) | Self::DnsServer(addrs) => {
                addrs.iter().flat_map(|addr| addr.octets()).collect()
            }
            Self::LeaseTime(time) | Self::RenewalTime(time) | Self::RebindingTime(time) => {
                time.to_be_bytes().to_vec()
            }
            Self::MessageType(msg_type) => vec![*msg_type as u8],
            Self::Message(text) => text.as_bytes().to_vec(),
            Self::Unknown(_, data) => data.clone(),
        };

        let Ok(len) = u8::try_from(value.len()) else {
            return Err(Error::OptionOverflow {
                code: self.option_code(),
                needed: value.len(),
                remaining: MAX_OPTION_VALUE,
            });
        };

        let mut result = Vec::with_capacity(value.len() + 2);
        result.push(self.option_code());
        result.push(len);
        result.extend_from_slice(&value);
        Ok(result)
    }
}

/// Bounds-checked writer over a message's option area.
///
/// One byte is always held back for the `END` marker, so a writer that
/// accepted every [`push`](Self::push) can always be [`finish`](Self::finish)ed.
#[derive(Debug)]
pub struct OptionWriter {
    buffer: [u8; OPTIONS_SIZE],
    len: usize,
}

impl Default for OptionWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl OptionWriter {
    pub fn new() -> Self {
        Self {
            buffer: [0; OPTIONS_SIZE],
            len: 0,
        }
    }

    /// Bytes still available for options, not counting the reserved `END`.
    pub fn remaining(&self) -> usize {
        OPTIONS_SIZE - 1 - self.len
    }

    /// Appends one TLV option.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OptionOverflow`] when the encoded option does not fit,
    /// or its value is too long for a single option. Nothing is written in
    /// that case.
    pub fn push(&mut self, option: &DhcpOption) -> Result<()> {
        let encoded = option.encode()?;
        if encoded.len() > self.remaining() {
            return Err(Error::OptionOverflow {
                code: option.option_code(),
                needed: encoded.len(),
                remaining: self.remaining(),
            });
        }
        self.buffer[self.len..self.len + encoded.len()].copy_from_slice(&encoded);
        self.len += encoded.len();
        Ok(())
    }

    /// Terminates the stream with `END` and returns the zero-padded area.
    pub fn finish(mut self) -> [u8; OPTIONS_SIZE] {
        self.buffer[self.len] = OptionCode::End as u8;
        self.buffer
    }
}
