//! DHCP message decoding and encoding per RFC 2131.
//!
//! Every message exchanged by the server has the same fixed size: a 236-byte
//! BOOTP header, a 4-byte magic cookie and a 308-byte option area. Received
//! datagrams are copied into a zeroed buffer of that size before decoding,
//! and replies are always encoded to exactly that size.
//!
//! # Message Structure
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     op (1)    |   htype (1)   |   hlen (1)    |   hops (1)    |
//! +---------------+---------------+---------------+---------------+
//! |                            xid (4)                            |
//! +-------------------------------+-------------------------------+
//! |           secs (2)            |           flags (2)           |
//! +-------------------------------+-------------------------------+
//! |                          ciaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          yiaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          siaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          giaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          chaddr (16)                          |
//! +---------------------------------------------------------------+
//! |                          sname (64)                           |
//! +---------------------------------------------------------------+
//! |                          file (128)                           |
//! +---------------------------------------------------------------+
//! |                    magic cookie (4) = 99.130.83.99            |
//! +---------------------------------------------------------------+
//! |                          options (308)                        |
//! +---------------------------------------------------------------+
//! ```
//!
//! Decoding does not insist on the magic cookie; the request handler
//! checks [`DhcpMessage::has_magic_cookie`] and drops BOOTP-only traffic.

use std::fmt;
use std::net::Ipv4Addr;

use crate::error::{Error, Result};
use crate::options::{DhcpOption, MessageType, OPTIONS_SIZE, OptionCode, OptionWriter};

/// DHCP magic cookie that identifies DHCP packets (vs BOOTP).
pub const DHCP_MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

const DHCP_CHADDR_OFFSET: usize = 28;
const DHCP_CHADDR_SIZE: usize = 16;
const DHCP_SNAME_OFFSET: usize = DHCP_CHADDR_OFFSET + DHCP_CHADDR_SIZE;
const DHCP_SNAME_SIZE: usize = 64;
const DHCP_FILE_OFFSET: usize = DHCP_SNAME_OFFSET + DHCP_SNAME_SIZE;
const DHCP_FILE_SIZE: usize = 128;
const DHCP_MAGIC_COOKIE_OFFSET: usize = DHCP_FILE_OFFSET + DHCP_FILE_SIZE;

/// Size of the fixed header portion including magic cookie.
pub const DHCP_FIXED_HEADER_SIZE: usize = DHCP_MAGIC_COOKIE_OFFSET + DHCP_MAGIC_COOKIE.len();

/// Size of every message on the wire.
pub const MESSAGE_SIZE: usize = DHCP_FIXED_HEADER_SIZE + OPTIONS_SIZE;

/// BOOTP/DHCP operation code for client requests.
pub const BOOTREQUEST: u8 = 1;

/// BOOTP/DHCP operation code for server replies.
pub const BOOTREPLY: u8 = 2;

/// Hardware type for Ethernet.
pub const HTYPE_ETHERNET: u8 = 1;

/// Hardware address length for Ethernet (6 bytes).
pub const HLEN_ETHERNET: u8 = 6;

/// A station's link-layer address, taken from the first six bytes of `chaddr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; 6]);

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a, b, c, d, e, g
        )
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

/// A decoded DHCP message.
///
/// This struct represents both client requests and server replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpMessage {
    /// Operation code: [`BOOTREQUEST`] (1) or [`BOOTREPLY`] (2).
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    /// Transaction ID chosen by client, echoed in replies.
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    /// Client IP address, set by a configured client that is renewing.
    pub ciaddr: Ipv4Addr,
    /// "Your" IP address - the address being assigned to the client.
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    /// Client hardware address; the first six bytes are the MAC.
    pub chaddr: [u8; 16],
    pub sname: [u8; 64],
    pub file: [u8; 128],
    /// Bytes found at the cookie position, kept verbatim.
    pub magic: [u8; 4],
    /// Options in the order they appeared, pads and `END` excluded.
    pub options: Vec<DhcpOption>,
}

impl DhcpMessage {
    /// Decodes a message from a buffer of exactly [`MESSAGE_SIZE`] bytes.
    ///
    /// Options are only read when the magic cookie is present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] if the buffer has the wrong size or
    /// the option stream is malformed (truncated length or data).
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != MESSAGE_SIZE {
            return Err(Error::InvalidPacket(format!(
                "Message is {} bytes (expected {})",
                data.len(),
                MESSAGE_SIZE
            )));
        }

        let mut chaddr = [0u8; 16];
        chaddr.copy_from_slice(&data[DHCP_CHADDR_OFFSET..DHCP_SNAME_OFFSET]);

        let mut sname = [0u8; 64];
        sname.copy_from_slice(&data[DHCP_SNAME_OFFSET..DHCP_FILE_OFFSET]);

        let mut file = [0u8; 128];
        file.copy_from_slice(&data[DHCP_FILE_OFFSET..DHCP_MAGIC_COOKIE_OFFSET]);

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&data[DHCP_MAGIC_COOKIE_OFFSET..DHCP_FIXED_HEADER_SIZE]);

        let options = if magic == DHCP_MAGIC_COOKIE {
            Self::decode_options(&data[DHCP_FIXED_HEADER_SIZE..])?
        } else {
            Vec::new()
        };

        Ok(Self {
            op: data[0],
            htype: data[1],
            hlen: data[2],
            hops: data[3],
            xid: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            secs: u16::from_be_bytes([data[8], data[9]]),
            flags: u16::from_be_bytes([data[10], data[11]]),
            ciaddr: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            yiaddr: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
            siaddr: Ipv4Addr::new(data[20], data[21], data[22], data[23]),
            giaddr: Ipv4Addr::new(data[24], data[25], data[26], data[27]),
            chaddr,
            sname,
            file,
            magic,
            options,
        })
    }

    fn decode_options(data: &[u8]) -> Result<Vec<DhcpOption>> {
        let mut options = Vec::new();
        let mut index = 0;

        while index < data.len() {
            let code = data[index];

            if code == OptionCode::Pad as u8 {
                index += 1;
                continue;
            }

            if code == OptionCode::End as u8 {
                break;
            }

            if index + 1 >= data.len() {
                return Err(Error::InvalidPacket("Option length missing".to_string()));
            }

            let length = data[index + 1] as usize;

            if index + 2 + length > data.len() {
                return Err(Error::InvalidPacket("Option data truncated".to_string()));
            }

            let option_data = &data[index + 2..index + 2 + length];
            options.push(DhcpOption::parse(code, option_data)?);

            index += 2 + length;
        }

        Ok(options)
    }

    /// Encodes the message to exactly [`MESSAGE_SIZE`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OptionOverflow`] if the options do not fit in the
    /// option area together with the `END` marker.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut writer = OptionWriter::new();
        for option in &self.options {
            writer.push(option)?;
        }

        let mut message = Vec::with_capacity(MESSAGE_SIZE);

        message.push(self.op);
        message.push(self.htype);
        message.push(self.hlen);
        message.push(self.hops);

        message.extend_from_slice(&self.xid.to_be_bytes());
        message.extend_from_slice(&self.secs.to_be_bytes());
        message.extend_from_slice(&self.flags.to_be_bytes());

        message.extend_from_slice(&self.ciaddr.octets());
        message.extend_from_slice(&self.yiaddr.octets());
        message.extend_from_slice(&self.siaddr.octets());
        message.extend_from_slice(&self.giaddr.octets());

        message.extend_from_slice(&self.chaddr);
        message.extend_from_slice(&self.sname);
        message.extend_from_slice(&self.file);
        message.extend_from_slice(&self.magic);
        message.extend_from_slice(&writer.finish());

        Ok(message)
    }

    pub fn has_magic_cookie(&self) -> bool {
        self.magic == DHCP_MAGIC_COOKIE
    }

    /// Returns the DHCP message type (Option 53) if present.
    ///
    /// Returns `None` for BOOTP packets and unrecognized type values.
    pub fn message_type(&self) -> Option<MessageType> {
        self.options.iter().find_map(|opt| match opt {
            DhcpOption::MessageType(t) => Some(*t),
            _ => None,
        })
    }

    /// Returns the requested IP address (Option 50) if present.
    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.options.iter().find_map(|opt| match opt {
            DhcpOption::RequestedIpAddress(ip) => Some(*ip),
            _ => None,
        })
    }

    /// True when option 50 is present, even if its value was unusable.
    pub fn has_requested_ip_option(&self) -> bool {
        self.options
            .iter()
            .any(|opt| opt.option_code() == OptionCode::RequestedIpAddress as u8)
    }

    pub fn server_identifier(&self) -> Option<Ipv4Addr> {
        self.options.iter().find_map(|opt| match opt {
            DhcpOption::ServerIdentifier(ip) => Some(*ip),
            _ => None,
        })
    }

    pub fn mac(&self) -> MacAddr {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.chaddr[..6]);
        MacAddr(mac)
    }

    /// Creates a reply to `request`.
    ///
    /// `htype`, `hlen`, `xid`, `giaddr` and `chaddr` are copied; the other
    /// header fields are zeroed. The message type is added as the first option.
    pub fn create_reply(
        request: &DhcpMessage,
        message_type: MessageType,
        your_ip: Ipv4Addr,
        client_ip: Ipv4Addr,
        options: Vec<DhcpOption>,
    ) -> Self {
        let mut all_options = vec![DhcpOption::MessageType(message_type)];
        all_options.extend(options);

        Self {
            op: BOOTREPLY,
            htype: request.htype,
            hlen: request.hlen,
            hops: 0,
            xid: request.xid,
            secs: 0,
            flags: 0,
            ciaddr: client_ip,
            yiaddr: your_ip,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: request.giaddr,
            chaddr: request.chaddr,
            sname: [0u8; 64],
            file: [0u8; 128],
            magic: DHCP_MAGIC_COOKIE,
            options: all_options,
        }
    }

    /// Builds a client request, as a station would send it.
    pub fn new_request(
        mac: MacAddr,
        xid: u32,
        message_type: MessageType,
        ciaddr: Ipv4Addr,
        extra: Vec<DhcpOption>,
    ) -> Self {
        let mut chaddr = [0u8; 16];
        chaddr[..6].copy_from_slice(&mac.0);

        let mut options = vec![DhcpOption::MessageType(message_type)];
        options.extend(extra);

        Self {
            op: BOOTREQUEST,
            htype: HTYPE_ETHERNET,
            hlen: HLEN_ETHERNET,
            hops: 0,
            xid,
            secs: 0,
            flags: 0,
            ciaddr,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr,
            sname: [0u8; 64],
            file: [0u8; 128],
            magic: DHCP_MAGIC_COOKIE,
            options,
        }
    }
}
