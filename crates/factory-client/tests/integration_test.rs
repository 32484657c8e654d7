//! Integration tests for the image factory client
//!
//! These tests talk to a real image factory instance.
//! Set IMAGE_FACTORY_URL and IMAGE_FACTORY_PXE_URL to override the defaults.

use factory_client::{FactoryClient, SchematicService};

fn client_from_env(secure_boot: bool) -> FactoryClient {
    let base_url = std::env::var("IMAGE_FACTORY_URL")
        .unwrap_or_else(|_| "https://factory.talos.dev".to_string());
    let pxe_base_url = std::env::var("IMAGE_FACTORY_PXE_URL")
        .unwrap_or_else(|_| "https://pxe.factory.talos.dev".to_string());

    FactoryClient::new(base_url, pxe_base_url, secure_boot).expect("failed to create client")
}

#[tokio::test]
#[ignore] // Requires network access to the image factory
async fn test_schematic_ipxe_url_round_trip() {
    let client = client_from_env(false);

    let url = client
        .schematic_ipxe_url("v1.10.6", "amd64", &[], &[])
        .await
        .expect("failed to create schematic");

    assert!(url.contains("/pxe/"));
    assert!(url.ends_with("/v1.10.6/metal-amd64"));
}

#[tokio::test]
#[ignore] // Requires network access to the image factory
async fn test_schematic_ipxe_url_is_deterministic() {
    let client = client_from_env(false);
    let extensions = vec!["siderolabs/hello-world-service".to_string()];

    let first = client
        .schematic_ipxe_url("v1.10.6", "amd64", &extensions, &[])
        .await
        .expect("failed to create schematic");
    let second = client
        .schematic_ipxe_url("v1.10.6", "amd64", &extensions, &[])
        .await
        .expect("failed to create schematic");

    assert_eq!(first, second);
}
