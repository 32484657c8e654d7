//! DHCP proxy for PXE boot.
//!
//! Implements proxy-DHCP per RFC 4578: replies to PXE DISCOVER/REQUEST
//! broadcasts with OFFER/ACK messages that carry only boot parameters. The
//! real DHCP server on the network keeps handing out addresses; every reply
//! here has `yiaddr` zero and the `PXEClient` vendor class that tells the
//! firmware both answers belong together.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dhcpv4::{
    MessageType, Packet, OP_BOOT_REQUEST, OPT_BOOTFILE_NAME, OPT_CLIENT_IDENTIFIER,
    OPT_CLIENT_MACHINE_IDENTIFIER, OPT_CLIENT_SYSTEM_ARCHITECTURE, OPT_MESSAGE_TYPE,
    OPT_SERVER_IDENTIFIER, OPT_USER_CLASS, OPT_VENDOR_CLASS_IDENTIFIER,
};
use crate::error::PxeError;

/// User class iPXE reports once our patched binary is running (option 77).
const IPXE_USER_CLASS: &[u8] = b"iPXE";

/// Vendor class marking a proxy-DHCP reply (option 60).
const PXE_CLIENT_CLASS: &[u8] = b"PXEClient";

/// Client system architecture (option 93) values per RFC 4578.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientArch {
    BiosX86,
    EfiX86_64,
    EfiArm64,
}

impl ClientArch {
    /// Maps the first architecture value of option 93.
    fn from_option(data: &[u8]) -> Option<Self> {
        let code = u16::from_be_bytes([*data.first()?, *data.get(1)?]);

        match code {
            0x0000 | 0x0006 => Some(Self::BiosX86),
            0x0007 | 0x0009 => Some(Self::EfiX86_64),
            0x000b => Some(Self::EfiArm64),
            _ => None,
        }
    }

    /// TFTP boot file served to raw firmware of this architecture.
    fn boot_file(self) -> &'static str {
        match self {
            Self::BiosX86 => "undionly.kpxe",
            Self::EfiX86_64 => "ipxe.efi",
            Self::EfiArm64 => "ipxe-arm64.efi",
        }
    }
}

/// DHCP proxy server.
pub struct DhcpProxy {
    advertise_address: Ipv4Addr,
    api_port: u16,
    interface: String,
}

impl DhcpProxy {
    /// Creates a new DHCP proxy bound to the given interface.
    pub fn new(advertise_address: Ipv4Addr, api_port: u16, interface: String) -> Self {
        Self {
            advertise_address,
            api_port,
            interface,
        }
    }

    /// Runs the proxy until the token is cancelled.
    ///
    /// Packet handling is stateless per transaction, so every datagram is
    /// served on its own task and no lock is shared across transactions.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), PxeError> {
        let socket = Arc::new(self.bind_socket()?);

        info!(
            interface = %self.interface,
            advertise_address = %self.advertise_address,
            "start DHCP proxy"
        );

        let mut buf = vec![0u8; 1500];

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                received = socket.recv_from(&mut buf) => {
                    let (len, peer) = received?;
                    let frame = buf[..len].to_vec();

                    let socket = Arc::clone(&socket);
                    let advertise_address = self.advertise_address;
                    let api_port = self.api_port;

                    tokio::spawn(async move {
                        handle_frame(&socket, &frame, peer, advertise_address, api_port).await;
                    });
                }
            }
        }
    }

    /// Binds the broadcast socket on port 67.
    ///
    /// The client has no IP address yet, so the socket must be tied to the
    /// selected interface and allowed to send link-level broadcasts.
    fn bind_socket(&self) -> Result<UdpSocket, PxeError> {
        let socket = socket2::Socket::new(
            socket2::Domain::IPV4,
            socket2::Type::DGRAM,
            Some(socket2::Protocol::UDP),
        )?;
        socket.set_nonblocking(true)?;

        socket.set_reuse_address(true)?;
        socket.set_broadcast(true)?;
        socket.bind_device(Some(self.interface.as_bytes()))?;
        socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 67).into())?;

        Ok(UdpSocket::from_std(std::net::UdpSocket::from(socket))?)
    }
}

async fn handle_frame(
    socket: &UdpSocket,
    frame: &[u8],
    peer: SocketAddr,
    advertise_address: Ipv4Addr,
    api_port: u16,
) {
    let request = match Packet::decode(frame) {
        Ok(request) => request,
        Err(err) => {
            debug!(%peer, error = %err, "drop malformed DHCP packet");
            return;
        }
    };

    let mac = format_mac(request.hardware_address());

    let Some(reply) = build_reply(&request, advertise_address, api_port) else {
        debug!(%peer, %mac, "ignore DHCP packet");
        return;
    };

    let boot_file = reply
        .option(OPT_BOOTFILE_NAME)
        .map(|data| String::from_utf8_lossy(data).into_owned())
        .unwrap_or_default();

    let xid = format!("{:#010x}", request.xid);

    info!(%mac, %xid, %boot_file, "reply to PXE request");

    let destination = SocketAddrV4::new(Ipv4Addr::BROADCAST, 68);

    if let Err(err) = socket.send_to(&reply.encode(), destination).await {
        warn!(%mac, error = %err, "failed to send DHCP reply");
    }
}

/// Builds the proxy reply for a PXE request, or `None` when the packet is to
/// be ignored.
fn build_reply(request: &Packet, advertise_address: Ipv4Addr, api_port: u16) -> Option<Packet> {
    if request.op != OP_BOOT_REQUEST {
        return None;
    }

    let reply_type = match request.message_type()? {
        MessageType::Discover => MessageType::Offer,
        MessageType::Request => MessageType::Ack,
        _ => return None,
    };

    let arch = ClientArch::from_option(request.option(OPT_CLIENT_SYSTEM_ARCHITECTURE)?)?;

    // A client that already runs our patched iPXE identifies itself via the
    // user class and is handed the stage-2 script URL instead of a binary.
    let boot_file = if request.option(OPT_USER_CLASS) == Some(IPXE_USER_CLASS) {
        format!("http://{advertise_address}:{api_port}/ipxe/init.ipxe")
    } else {
        arch.boot_file().to_string()
    };

    let mut reply = Packet::zeroed();
    reply.op = crate::dhcpv4::OP_BOOT_REPLY;
    reply.htype = request.htype;
    reply.hlen = request.hlen;
    reply.xid = request.xid;
    reply.flags = request.flags;
    reply.giaddr = request.giaddr;
    reply.chaddr = request.chaddr;
    reply.yiaddr = Ipv4Addr::UNSPECIFIED;
    reply.siaddr = advertise_address;
    reply.set_boot_file(&boot_file).ok()?;

    reply.push_option(OPT_MESSAGE_TYPE, vec![reply_type.code()]);
    reply.push_option(
        OPT_SERVER_IDENTIFIER,
        advertise_address.octets().to_vec(),
    );
    reply.push_option(OPT_VENDOR_CLASS_IDENTIFIER, PXE_CLIENT_CLASS.to_vec());
    reply.push_option(OPT_BOOTFILE_NAME, boot_file.into_bytes());

    for code in [OPT_CLIENT_IDENTIFIER, OPT_CLIENT_MACHINE_IDENTIFIER] {
        if let Some(data) = request.option(code) {
            reply.push_option(code, data.to_vec());
        }
    }

    Some(reply)
}

fn format_mac(address: &[u8]) -> String {
    address
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADVERTISE: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);

    fn pxe_discover(arch: [u8; 2]) -> Packet {
        let mut packet = Packet::zeroed();
        packet.op = OP_BOOT_REQUEST;
        packet.htype = 1;
        packet.hlen = 6;
        packet.xid = 0xdead_beef;
        packet.flags = 0x8000;
        packet.chaddr[..6].copy_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        packet.push_option(OPT_MESSAGE_TYPE, vec![MessageType::Discover.code()]);
        packet.push_option(OPT_VENDOR_CLASS_IDENTIFIER, PXE_CLIENT_CLASS.to_vec());
        packet.push_option(OPT_CLIENT_SYSTEM_ARCHITECTURE, arch.to_vec());
        packet
    }

    fn boot_file_option(reply: &Packet) -> String {
        String::from_utf8(reply.option(OPT_BOOTFILE_NAME).unwrap().to_vec()).unwrap()
    }

    #[test]
    fn test_bios_discover_gets_undionly_offer() {
        let reply = build_reply(&pxe_discover([0x00, 0x00]), ADVERTISE, 50084).unwrap();

        assert_eq!(reply.message_type(), Some(MessageType::Offer));
        assert_eq!(boot_file_option(&reply), "undionly.kpxe");
        assert!(reply.file.starts_with(b"undionly.kpxe\0"));
        assert_eq!(reply.yiaddr, Ipv4Addr::UNSPECIFIED);
        assert_eq!(reply.siaddr, ADVERTISE);
        assert_eq!(
            reply.option(OPT_VENDOR_CLASS_IDENTIFIER),
            Some(&b"PXEClient"[..])
        );
        assert_eq!(
            reply.option(OPT_SERVER_IDENTIFIER),
            Some(&[10, 0, 0, 5][..])
        );
    }

    #[test]
    fn test_ipxe_user_class_gets_script_url() {
        let mut request = pxe_discover([0x00, 0x07]);
        request.push_option(OPT_USER_CLASS, IPXE_USER_CLASS.to_vec());

        let reply = build_reply(&request, ADVERTISE, 50084).unwrap();

        assert_eq!(
            boot_file_option(&reply),
            "http://10.0.0.5:50084/ipxe/init.ipxe"
        );
    }

    #[test]
    fn test_boot_file_table_by_architecture() {
        for (arch, expected) in [
            ([0x00u8, 0x00u8], "undionly.kpxe"),
            ([0x00, 0x06], "undionly.kpxe"),
            ([0x00, 0x07], "ipxe.efi"),
            ([0x00, 0x09], "ipxe.efi"),
            ([0x00, 0x0b], "ipxe-arm64.efi"),
        ] {
            let reply = build_reply(&pxe_discover(arch), ADVERTISE, 50084).unwrap();
            assert_eq!(boot_file_option(&reply), expected, "arch {arch:02x?}");
        }
    }

    #[test]
    fn test_request_is_acked() {
        let mut request = pxe_discover([0x00, 0x07]);
        request.options[0] = crate::dhcpv4::RawOption {
            code: OPT_MESSAGE_TYPE,
            data: vec![MessageType::Request.code()],
        };

        let reply = build_reply(&request, ADVERTISE, 50084).unwrap();

        assert_eq!(reply.message_type(), Some(MessageType::Ack));
    }

    #[test]
    fn test_reply_preserves_transaction_fields() {
        let reply = build_reply(&pxe_discover([0x00, 0x07]), ADVERTISE, 50084).unwrap();

        assert_eq!(reply.xid, 0xdead_beef);
        assert_eq!(reply.flags, 0x8000);
        assert_eq!(reply.hardware_address(), &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    }

    #[test]
    fn test_reply_echoes_client_and_machine_identifiers() {
        let mut request = pxe_discover([0x00, 0x07]);
        request.push_option(OPT_CLIENT_IDENTIFIER, vec![0x01, 0xaa, 0xbb]);
        request.push_option(OPT_CLIENT_MACHINE_IDENTIFIER, vec![0u8; 17]);

        let reply = build_reply(&request, ADVERTISE, 50084).unwrap();

        assert_eq!(
            reply.option(OPT_CLIENT_IDENTIFIER),
            Some(&[0x01, 0xaa, 0xbb][..])
        );
        assert_eq!(reply.option(OPT_CLIENT_MACHINE_IDENTIFIER), Some(&[0u8; 17][..]));
    }

    #[test]
    fn test_unknown_architecture_is_ignored() {
        assert!(build_reply(&pxe_discover([0x00, 0x02]), ADVERTISE, 50084).is_none());
    }

    #[test]
    fn test_missing_architecture_is_ignored() {
        let mut request = pxe_discover([0x00, 0x00]);
        request.options.retain(|o| o.code != OPT_CLIENT_SYSTEM_ARCHITECTURE);

        assert!(build_reply(&request, ADVERTISE, 50084).is_none());
    }

    #[test]
    fn test_non_boot_message_types_are_ignored() {
        let mut request = pxe_discover([0x00, 0x00]);
        request.options[0] = crate::dhcpv4::RawOption {
            code: OPT_MESSAGE_TYPE,
            data: vec![MessageType::Inform.code()],
        };

        assert!(build_reply(&request, ADVERTISE, 50084).is_none());
    }

    #[test]
    fn test_boot_replies_are_ignored() {
        let mut request = pxe_discover([0x00, 0x00]);
        request.op = crate::dhcpv4::OP_BOOT_REPLY;

        assert!(build_reply(&request, ADVERTISE, 50084).is_none());
    }
}
