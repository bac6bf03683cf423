//! VerticaDB Core - data model for the VerticaDB operator
//!
//! This crate provides:
//! - The VerticaDB custom resource and its helpers
//! - Well-known annotations, labels and paths
//! - Object naming and version parsing
//! - The reconcile `Outcome` shared by every actor
//! - Error types with miette diagnostics

pub mod crd;
pub mod error;
pub mod events;
pub mod meta;
pub mod names;
pub mod types;
pub mod version;

// Re-export commonly used types
pub use crd::{
    InitPolicy, PodStatusDetail, Sandbox, SandboxStatus, SandboxSubcluster, Subcluster,
    SubclusterStatus, SubclusterType, VerticaDB, VerticaDbSpec, VerticaDbStatus,
};
pub use error::{CoreError, Result};
pub use types::{ObjectKey, Outcome};
pub use version::VersionInfo;

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;

/// Serialize a value to YAML
pub fn to_yaml<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_yaml::to_string(value).map_err(|e| {
        CoreError::serialization_error(
            format!("Failed to serialize to YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a value from YAML
pub fn from_yaml<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| {
        CoreError::serialization_error(
            format!("Failed to deserialize from YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a value from JSON
pub fn from_json<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| {
        CoreError::serialization_error(
            format!("Failed to deserialize from JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}
