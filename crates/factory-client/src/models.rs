//! Wire models for the Talos Image Factory API.
//!
//! A schematic is a content-addressed recipe: the factory hashes the document
//! and returns the same ID for the same content, which is what makes the
//! composed PXE URLs deterministic.

use serde::{Deserialize, Serialize};

/// Schematic document sent to the factory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schematic {
    pub customization: Customization,
}

/// Customization section of a schematic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customization {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_kernel_args: Vec<String>,
    #[serde(default)]
    pub system_extensions: SystemExtensions,
}

/// System extensions to bake into the image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemExtensions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub official_extensions: Vec<String>,
}

/// Response of the schematic creation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedSchematic {
    pub id: String,
}

impl Schematic {
    /// Builds a schematic from kernel args and official extensions.
    pub fn new(extra_kernel_args: Vec<String>, official_extensions: Vec<String>) -> Self {
        Self {
            customization: Customization {
                extra_kernel_args,
                system_extensions: SystemExtensions {
                    official_extensions,
                },
            },
        }
    }
}
