//! Image factory API client
//!
//! Creates schematics on the Talos Image Factory and composes PXE URLs for
//! the resulting boot artifacts. The factory content-addresses schematics, so
//! the same inputs always map to the same URL.

use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use crate::error::FactoryError;
use crate::models::{CreatedSchematic, Schematic};
use crate::service::SchematicService;

/// Timeout applied to every schematic creation call.
const SCHEMATIC_CREATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Image factory API client
pub struct FactoryClient {
    client: Client,
    base_url: String,
    pxe_base_url: String,
    secure_boot_enabled: bool,
}

impl FactoryClient {
    /// Create a new image factory client
    ///
    /// # Arguments
    /// * `base_url` - factory API base URL (e.g., "https://factory.talos.dev")
    /// * `pxe_base_url` - factory PXE base URL (e.g., "https://pxe.factory.talos.dev")
    /// * `secure_boot_enabled` - compose URLs for the secure boot UKI variant
    pub fn new(
        base_url: String,
        pxe_base_url: String,
        secure_boot_enabled: bool,
    ) -> Result<Self, FactoryError> {
        let client = Client::builder()
            .timeout(SCHEMATIC_CREATE_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            pxe_base_url: pxe_base_url.trim_end_matches('/').to_string(),
            secure_boot_enabled,
        })
    }

    /// Get the factory API base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn schematic_create(&self, schematic: &Schematic) -> Result<String, FactoryError> {
        let url = format!("{}/schematics", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(schematic)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FactoryError::Api(format!(
                "failed to create schematic: {} - {}",
                status, body
            )));
        }

        let created: CreatedSchematic = response.json().await?;
        Ok(created.id)
    }
}

#[async_trait::async_trait]
impl SchematicService for FactoryClient {
    async fn schematic_ipxe_url(
        &self,
        talos_version: &str,
        arch: &str,
        extensions: &[String],
        extra_kernel_args: &[String],
    ) -> Result<String, FactoryError> {
        debug!(
            talos_version,
            arch,
            ?extensions,
            ?extra_kernel_args,
            "generate schematic iPXE URL"
        );

        if talos_version.is_empty() {
            return Err(FactoryError::InvalidRequest(
                "talos version is required".to_string(),
            ));
        }

        let schematic = Schematic::new(extra_kernel_args.to_vec(), extensions.to_vec());
        let schematic_id = self.schematic_create(&schematic).await?;

        let ipxe_url = compose_pxe_url(
            &self.pxe_base_url,
            &schematic_id,
            talos_version,
            arch,
            self.secure_boot_enabled,
        );

        debug!(%ipxe_url, "generated schematic iPXE URL");

        Ok(ipxe_url)
    }
}

/// Composes the PXE URL for a schematic ID.
pub fn compose_pxe_url(
    pxe_base_url: &str,
    schematic_id: &str,
    talos_version: &str,
    arch: &str,
    secure_boot_enabled: bool,
) -> String {
    let mut url = format!(
        "{}/pxe/{}/{}/metal-{}",
        pxe_base_url, schematic_id, talos_version, arch
    );

    if secure_boot_enabled {
        url.push_str("-secureboot");
    }

    url
}
