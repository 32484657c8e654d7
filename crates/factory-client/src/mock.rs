//! Mock schematic service for unit testing
//!
//! Provides an in-memory implementation of `SchematicService` that can be
//! used in unit tests without a running image factory. Schematic IDs are
//! assigned per distinct schematic content, so repeated calls with the same
//! inputs return the same URL, mirroring the content-addressing of the real
//! factory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::client::compose_pxe_url;
use crate::error::FactoryError;
use crate::models::Schematic;
use crate::service::SchematicService;

/// Arguments of the most recent `schematic_ipxe_url` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub talos_version: String,
    pub arch: String,
    pub extensions: Vec<String>,
    pub extra_kernel_args: Vec<String>,
}

/// Mock schematic service for testing
#[derive(Clone)]
pub struct MockFactoryClient {
    pxe_base_url: String,
    secure_boot_enabled: bool,
    schematics: Arc<Mutex<HashMap<String, String>>>,
    last_request: Arc<Mutex<Option<RecordedRequest>>>,
    fail_with: Arc<Mutex<Option<String>>>,
}

impl MockFactoryClient {
    /// Create a new mock client
    pub fn new(pxe_base_url: impl Into<String>, secure_boot_enabled: bool) -> Self {
        Self {
            pxe_base_url: pxe_base_url.into(),
            secure_boot_enabled,
            schematics: Arc::new(Mutex::new(HashMap::new())),
            last_request: Arc::new(Mutex::new(None)),
            fail_with: Arc::new(Mutex::new(None)),
        }
    }

    /// Make every subsequent call fail with the given API error message.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.fail_with.lock().unwrap() = Some(message.into());
    }

    /// Arguments of the most recent call, if any.
    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SchematicService for MockFactoryClient {
    async fn schematic_ipxe_url(
        &self,
        talos_version: &str,
        arch: &str,
        extensions: &[String],
        extra_kernel_args: &[String],
    ) -> Result<String, FactoryError> {
        *self.last_request.lock().unwrap() = Some(RecordedRequest {
            talos_version: talos_version.to_string(),
            arch: arch.to_string(),
            extensions: extensions.to_vec(),
            extra_kernel_args: extra_kernel_args.to_vec(),
        });

        if let Some(message) = self.fail_with.lock().unwrap().clone() {
            return Err(FactoryError::Api(message));
        }

        if talos_version.is_empty() {
            return Err(FactoryError::InvalidRequest(
                "talos version is required".to_string(),
            ));
        }

        let schematic = Schematic::new(extra_kernel_args.to_vec(), extensions.to_vec());
        let content = serde_json::to_string(&schematic)?;

        let mut schematics = self.schematics.lock().unwrap();
        let next_id = format!("mock-schematic-{}", schematics.len());
        let id = schematics.entry(content).or_insert(next_id).clone();

        Ok(compose_pxe_url(
            &self.pxe_base_url,
            &id,
            talos_version,
            arch,
            self.secure_boot_enabled,
        ))
    }
}
