//! Schematic service trait for mocking
//!
//! Abstracts the image factory client so the HTTP handlers can be unit
//! tested without a running factory. The concrete `FactoryClient` implements
//! this trait; tests use `MockFactoryClient`.

use crate::error::FactoryError;

/// Ensures a schematic exists on the image factory and composes the iPXE URL
/// for it.
///
/// All methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait SchematicService: Send + Sync {
    /// Creates (or re-uses) the schematic for the given inputs and returns the
    /// PXE URL of the matching boot artifact.
    async fn schematic_ipxe_url(
        &self,
        talos_version: &str,
        arch: &str,
        extensions: &[String],
        extra_kernel_args: &[String],
    ) -> Result<String, FactoryError>;
}
