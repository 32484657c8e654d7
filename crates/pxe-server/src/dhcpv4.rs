//! DHCPv4 wire format.
//!
//! Fixed BOOTP header plus a raw option list, which is all the proxy needs:
//! it reads a handful of options from the client packet and echoes two of
//! them back unmodified. Options are kept as raw code/data pairs so that
//! pass-through never depends on protocol-level interpretation.
//!
//! [RFC 2131](https://datatracker.ietf.org/doc/html/rfc2131)
//! [RFC 2132](https://datatracker.ietf.org/doc/html/rfc2132)

use std::net::Ipv4Addr;

use thiserror::Error;

/// BOOTREQUEST op code.
pub const OP_BOOT_REQUEST: u8 = 1;
/// BOOTREPLY op code.
pub const OP_BOOT_REPLY: u8 = 2;

/// DHCP message type (option 53).
pub const OPT_MESSAGE_TYPE: u8 = 53;
/// Server identifier (option 54).
pub const OPT_SERVER_IDENTIFIER: u8 = 54;
/// Vendor class identifier (option 60).
pub const OPT_VENDOR_CLASS_IDENTIFIER: u8 = 60;
/// Client identifier (option 61).
pub const OPT_CLIENT_IDENTIFIER: u8 = 61;
/// Boot file name (option 67).
pub const OPT_BOOTFILE_NAME: u8 = 67;
/// User class (option 77).
pub const OPT_USER_CLASS: u8 = 77;
/// PXE client system architecture (option 93, RFC 4578).
pub const OPT_CLIENT_SYSTEM_ARCHITECTURE: u8 = 93;
/// PXE client machine identifier / UUID (option 97, RFC 4578).
pub const OPT_CLIENT_MACHINE_IDENTIFIER: u8 = 97;

const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

/// Offset of the option area, right after the fixed header and magic cookie.
const OPTIONS_OFFSET: usize = 240;

/// Minimum frame size BOOTP relays and clients expect.
const MIN_FRAME_LEN: usize = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet truncated at {0} bytes")]
    Truncated(usize),

    #[error("missing DHCP magic cookie")]
    BadCookie,

    #[error("malformed option area")]
    BadOption,

    #[error("boot file name of {0} bytes does not fit the file field")]
    BootFileTooLong(usize),
}

/// DHCP message types carried in option 53.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Discover,
    Offer,
    Request,
    Decline,
    Ack,
    Nak,
    Release,
    Inform,
}

impl MessageType {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Discover),
            2 => Some(Self::Offer),
            3 => Some(Self::Request),
            4 => Some(Self::Decline),
            5 => Some(Self::Ack),
            6 => Some(Self::Nak),
            7 => Some(Self::Release),
            8 => Some(Self::Inform),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Discover => 1,
            Self::Offer => 2,
            Self::Request => 3,
            Self::Decline => 4,
            Self::Ack => 5,
            Self::Nak => 6,
            Self::Release => 7,
            Self::Inform => 8,
        }
    }
}

/// A single option as it appeared on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOption {
    pub code: u8,
    pub data: Vec<u8>,
}

/// A DHCPv4 packet.
#[derive(Debug, Clone)]
pub struct Packet {
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; 16],
    pub sname: [u8; 64],
    pub file: [u8; 128],
    pub options: Vec<RawOption>,
}

impl Packet {
    /// An empty packet with every field zeroed.
    pub fn zeroed() -> Self {
        Self {
            op: 0,
            htype: 0,
            hlen: 0,
            hops: 0,
            xid: 0,
            secs: 0,
            flags: 0,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: [0; 16],
            sname: [0; 64],
            file: [0; 128],
            options: Vec::new(),
        }
    }

    /// Decodes a packet from a datagram.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < OPTIONS_OFFSET {
            return Err(PacketError::Truncated(buf.len()));
        }

        if buf[236..240] != MAGIC_COOKIE {
            return Err(PacketError::BadCookie);
        }

        let mut packet = Self::zeroed();
        packet.op = buf[0];
        packet.htype = buf[1];
        packet.hlen = buf[2];
        packet.hops = buf[3];
        packet.xid = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        packet.secs = u16::from_be_bytes([buf[8], buf[9]]);
        packet.flags = u16::from_be_bytes([buf[10], buf[11]]);
        packet.ciaddr = ipv4_at(buf, 12);
        packet.yiaddr = ipv4_at(buf, 16);
        packet.siaddr = ipv4_at(buf, 20);
        packet.giaddr = ipv4_at(buf, 24);
        packet.chaddr.copy_from_slice(&buf[28..44]);
        packet.sname.copy_from_slice(&buf[44..108]);
        packet.file.copy_from_slice(&buf[108..236]);
        packet.options = decode_options(&buf[OPTIONS_OFFSET..])?;

        Ok(packet)
    }

    /// Encodes the packet into a datagram, padded to the minimum frame size.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MIN_FRAME_LEN);

        buf.push(self.op);
        buf.push(self.htype);
        buf.push(self.hlen);
        buf.push(self.hops);
        buf.extend_from_slice(&self.xid.to_be_bytes());
        buf.extend_from_slice(&self.secs.to_be_bytes());
        buf.extend_from_slice(&self.flags.to_be_bytes());
        buf.extend_from_slice(&self.ciaddr.octets());
        buf.extend_from_slice(&self.yiaddr.octets());
        buf.extend_from_slice(&self.siaddr.octets());
        buf.extend_from_slice(&self.giaddr.octets());
        buf.extend_from_slice(&self.chaddr);
        buf.extend_from_slice(&self.sname);
        buf.extend_from_slice(&self.file);
        buf.extend_from_slice(&MAGIC_COOKIE);

        for option in &self.options {
            buf.push(option.code);
            buf.push(option.data.len() as u8);
            buf.extend_from_slice(&option.data);
        }

        buf.push(255);

        if buf.len() < MIN_FRAME_LEN {
            buf.resize(MIN_FRAME_LEN, 0);
        }

        buf
    }

    /// Data of the first occurrence of the given option.
    pub fn option(&self, code: u8) -> Option<&[u8]> {
        self.options
            .iter()
            .find(|option| option.code == code)
            .map(|option| option.data.as_slice())
    }

    /// Appends an option.
    pub fn push_option(&mut self, code: u8, data: Vec<u8>) {
        self.options.push(RawOption { code, data });
    }

    /// The DHCP message type, when present and known.
    pub fn message_type(&self) -> Option<MessageType> {
        self.option(OPT_MESSAGE_TYPE)
            .and_then(|data| data.first().copied())
            .and_then(MessageType::from_code)
    }

    /// The hardware address portion of `chaddr`.
    pub fn hardware_address(&self) -> &[u8] {
        let len = usize::from(self.hlen).min(self.chaddr.len());
        &self.chaddr[..len]
    }

    /// Sets the BOOTP `file` field to a NUL-terminated name.
    pub fn set_boot_file(&mut self, name: &str) -> Result<(), PacketError> {
        let bytes = name.as_bytes();

        // Keep one byte for the terminating NUL.
        if bytes.len() >= self.file.len() {
            return Err(PacketError::BootFileTooLong(bytes.len()));
        }

        self.file.fill(0);
        self.file[..bytes.len()].copy_from_slice(bytes);

        Ok(())
    }
}

fn ipv4_at(buf: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::new(buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3])
}

fn decode_options(mut buf: &[u8]) -> Result<Vec<RawOption>, PacketError> {
    let mut options = Vec::new();

    while let Some((&code, rest)) = buf.split_first() {
        match code {
            0 => {
                buf = rest;
            }
            255 => break,
            _ => {
                let (&len, rest) = rest.split_first().ok_or(PacketError::BadOption)?;
                let len = usize::from(len);

                if rest.len() < len {
                    return Err(PacketError::BadOption);
                }

                options.push(RawOption {
                    code,
                    data: rest[..len].to_vec(),
                });
                buf = &rest[len..];
            }
        }
    }

    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discover() -> Packet {
        let mut packet = Packet::zeroed();
        packet.op = OP_BOOT_REQUEST;
        packet.htype = 1;
        packet.hlen = 6;
        packet.xid = 0x1234_5678;
        packet.flags = 0x8000;
        packet.chaddr[..6].copy_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        packet.push_option(OPT_MESSAGE_TYPE, vec![MessageType::Discover.code()]);
        packet.push_option(OPT_VENDOR_CLASS_IDENTIFIER, b"PXEClient".to_vec());
        packet.push_option(OPT_CLIENT_SYSTEM_ARCHITECTURE, vec![0x00, 0x07]);
        packet
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let packet = discover();
        let decoded = Packet::decode(&packet.encode()).unwrap();

        assert_eq!(decoded.op, OP_BOOT_REQUEST);
        assert_eq!(decoded.xid, 0x1234_5678);
        assert_eq!(decoded.flags, 0x8000);
        assert_eq!(decoded.hardware_address(), &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert_eq!(decoded.message_type(), Some(MessageType::Discover));
        assert_eq!(decoded.option(OPT_VENDOR_CLASS_IDENTIFIER), Some(&b"PXEClient"[..]));
        assert_eq!(decoded.option(OPT_CLIENT_SYSTEM_ARCHITECTURE), Some(&[0x00, 0x07][..]));
    }

    #[test]
    fn test_encode_pads_to_minimum_frame() {
        assert!(discover().encode().len() >= 300);
    }

    #[test]
    fn test_decode_skips_pad_options() {
        let mut frame = discover().encode();
        // Insert pad bytes right at the start of the option area.
        frame.splice(240..240, [0u8, 0u8]);

        let decoded = Packet::decode(&frame).unwrap();

        assert_eq!(decoded.message_type(), Some(MessageType::Discover));
    }

    #[test]
    fn test_decode_rejects_truncated_packet() {
        let err = Packet::decode(&[0u8; 100]).unwrap_err();

        assert_eq!(err, PacketError::Truncated(100));
    }

    #[test]
    fn test_decode_rejects_missing_cookie() {
        let err = Packet::decode(&[0u8; 300]).unwrap_err();

        assert_eq!(err, PacketError::BadCookie);
    }

    #[test]
    fn test_decode_rejects_malformed_option_length() {
        let mut frame = discover().encode();
        frame.truncate(240);
        frame.push(OPT_USER_CLASS);
        frame.push(200); // length pointing past the end of the frame

        let err = Packet::decode(&frame).unwrap_err();

        assert_eq!(err, PacketError::BadOption);
    }

    #[test]
    fn test_set_boot_file_rejects_oversized_name() {
        let mut packet = Packet::zeroed();
        let name = "x".repeat(200);

        assert!(packet.set_boot_file(&name).is_err());
    }

    #[test]
    fn test_set_boot_file_is_nul_terminated() {
        let mut packet = Packet::zeroed();
        packet.set_boot_file("undionly.kpxe").unwrap();

        assert!(packet.file.starts_with(b"undionly.kpxe\0"));
    }
}
