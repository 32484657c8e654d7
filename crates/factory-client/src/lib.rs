//! Talos Image Factory API Client
//!
//! A client for the Talos Image Factory: uploads schematic documents (kernel
//! args + system extensions) and composes deterministic PXE URLs for the
//! resulting boot artifacts.
//!
//! # Example
//!
//! ```no_run
//! use factory_client::{FactoryClient, SchematicService};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = FactoryClient::new(
//!     "https://factory.talos.dev".to_string(),
//!     "https://pxe.factory.talos.dev".to_string(),
//!     false,
//! )?;
//!
//! let url = client
//!     .schematic_ipxe_url("v1.10.6", "amd64", &[], &[])
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod models;
pub mod service;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::FactoryClient;
pub use error::FactoryError;
pub use models::*;
pub use service::SchematicService;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockFactoryClient;
