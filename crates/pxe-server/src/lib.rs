//! PXE Boot Server
//!
//! Network-boot helper for Talos Linux built on `axum`, `async-tftp`, and a
//! proxy-DHCP responder.
//!
//! On a LAN with an existing DHCP server, this crate boots UEFI/BIOS PXE
//! clients into a chosen Talos kernel by:
//! - answering PXE discovery as a DHCP *proxy* (boot parameters only, no
//!   address allocation),
//! - serving patched iPXE binaries over TFTP (and HTTP),
//! - serving iPXE chain scripts that resolve to deterministic image-factory
//!   URLs, plus the machine configuration.
//!
//! All listeners run under one cancellation token; see [`server::Server`].

pub mod bootscript;
pub mod dhcp;
pub mod dhcpv4;
pub mod error;
pub mod http;
pub mod machine_config;
pub mod netif;
pub mod options;
pub mod patch;
pub mod server;
pub mod tftp;

pub use error::PxeError;
pub use options::{ServerOptions, SideroLinkOptions};
pub use server::Server;
