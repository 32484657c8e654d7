//! PXE server errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PxeError {
    #[error("DHCP error: {0}")]
    Dhcp(String),

    #[error("TFTP error: {0}")]
    Tftp(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image factory error: {0}")]
    Factory(#[from] factory_client::FactoryError),

    #[error("failed to patch {path}: {reason}")]
    Patch { path: String, reason: String },

    #[error("failed to determine advertise address: {0}")]
    AddressDiscovery(String),

    #[error("failed to resolve DHCP proxy interface: {0}")]
    InterfaceResolution(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("component {component} terminated abnormally: {reason}")]
    Join { component: String, reason: String },
}
