// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for VerticaDB model operations
#[derive(Error, Debug, Diagnostic)]
pub enum CoreError {
    /// Version string could not be parsed
    #[error("Invalid Vertica version: {version}")]
    #[diagnostic(
        code(verticadb::core::invalid_version),
        help("Versions look like 'v24.3.0' or 'v24.3.0-1'. Check the vertica.com/version annotation on the VerticaDB")
    )]
    InvalidVersion {
        #[allow(unused)]
        version: String,
    },

    /// Sandbox ConfigMap is malformed
    #[error("Invalid sandbox ConfigMap '{name}': {reason}")]
    #[diagnostic(
        code(verticadb::core::invalid_config_map),
        help("The ConfigMap must carry both the verticaDBName and sandboxName data keys, and the sandbox name cannot be empty")
    )]
    InvalidConfigMap {
        #[allow(unused)]
        name: String,
        #[allow(unused)]
        reason: String,
    },

    /// Subcluster missing from the VerticaDB spec
    #[error("Subcluster '{subcluster}' not found in VerticaDB '{vdb}'")]
    #[diagnostic(
        code(verticadb::core::subcluster_not_found),
        help("The subcluster may have been removed from spec.subclusters while an operation was in flight")
    )]
    SubclusterNotFound {
        #[allow(unused)]
        vdb: String,
        #[allow(unused)]
        subcluster: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(verticadb::core::serialization_error),
        help("Ensure the document format is valid JSON or YAML")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    pub fn invalid_version(version: impl Into<String>) -> Self {
        Self::InvalidVersion {
            version: version.into(),
        }
    }

    pub fn invalid_config_map(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfigMap {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn subcluster_not_found(vdb: impl Into<String>, subcluster: impl Into<String>) -> Self {
        Self::SubclusterNotFound {
            vdb: vdb.into(),
            subcluster: subcluster.into(),
        }
    }

    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }
}
