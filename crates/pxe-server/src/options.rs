//! Server options.
//!
//! `ServerOptions` is built once by the CLI and stays immutable for the
//! lifetime of the process. Values that can only be known at startup (the
//! advertise address, the DHCP proxy interface) are derived into a separate
//! `ResolvedConfig` so the rest of the server never sees partially-resolved
//! state.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use crate::error::PxeError;
use crate::netif;

/// Options for the PXE boot server.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// IP address the HTTP and TFTP servers listen on. Empty means all
    /// interfaces.
    pub api_listen_address: String,
    /// Routable IP address advertised to clients. Required when the host has
    /// more than one routable IPv4 address.
    pub api_advertise_address: Option<Ipv4Addr>,
    /// Port of the HTTP server.
    pub api_port: u16,
    /// Interface name, or an IP address on the interface, the DHCP proxy
    /// binds to. Defaults to the interface of the advertise address.
    pub dhcp_proxy_iface_or_ip: Option<String>,
    /// Base URL of the image factory API.
    pub image_factory_base_url: String,
    /// Base URL of the image factory PXE server.
    pub image_factory_pxe_base_url: String,
    /// Serve the secure boot UKI from the iPXE endpoint.
    pub secure_boot_enabled: bool,
    /// Do not run the DHCP proxy.
    pub disable_dhcp_proxy: bool,
    /// Official Talos extensions baked into the generated schematic.
    pub extensions: Vec<String>,
    /// Extra kernel arguments, whitespace separated.
    pub extra_kernel_args: String,
    /// Talos version to boot.
    pub talos_version: String,
    /// SideroLink connection parameters. When set, the server renders a
    /// machine configuration and serves it over `/config`.
    pub siderolink: Option<SideroLinkOptions>,
    /// Directory holding the prebuilt iPXE binaries to patch.
    pub ipxe_root: PathBuf,
    /// Directory the patched artifacts are written to and served from.
    pub tftp_root: PathBuf,
}

/// SideroLink parameters used to render the machine configuration.
#[derive(Debug, Clone)]
pub struct SideroLinkOptions {
    /// SideroLink API URL the booted machines join.
    pub api_url: String,
    /// Event sink port on the SideroLink link-local address.
    pub events_port: u16,
    /// Kmsg log port on the SideroLink link-local address.
    pub kmsg_log_port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            api_listen_address: String::new(),
            api_advertise_address: None,
            api_port: 50084,
            dhcp_proxy_iface_or_ip: None,
            image_factory_base_url: "https://factory.talos.dev".to_string(),
            image_factory_pxe_base_url: "https://pxe.factory.talos.dev".to_string(),
            secure_boot_enabled: false,
            disable_dhcp_proxy: false,
            extensions: vec!["siderolabs/hello-world-service".to_string()],
            extra_kernel_args: String::new(),
            talos_version: "v1.10.6".to_string(),
            siderolink: None,
            ipxe_root: PathBuf::from("/var/lib/ipxe"),
            tftp_root: PathBuf::from("/var/lib/tftp"),
        }
    }
}

impl Default for SideroLinkOptions {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            events_port: 8090,
            kmsg_log_port: 8092,
        }
    }
}

/// Runtime configuration derived from `ServerOptions` at startup.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The single routable address clients reach this server on. Embedded in
    /// the patched iPXE binaries and reported in DHCP replies alike.
    pub advertise_address: Ipv4Addr,
    /// Name of the interface the DHCP proxy binds to.
    pub dhcp_interface: String,
}

impl ResolvedConfig {
    /// Resolves the advertise address and the DHCP proxy interface.
    pub fn from_options(options: &ServerOptions) -> Result<Self, PxeError> {
        let advertise_address = match options.api_advertise_address {
            Some(address) => address,
            None => netif::discover_advertise_address()?,
        };

        let selector = options
            .dhcp_proxy_iface_or_ip
            .clone()
            .unwrap_or_else(|| advertise_address.to_string());

        let dhcp_interface = netif::resolve_interface(&selector)?;

        Ok(Self {
            advertise_address,
            dhcp_interface,
        })
    }
}
