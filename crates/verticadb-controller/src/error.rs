use miette::Diagnostic;
use thiserror::Error;

/// Controller error type for reconcile, dispatch and Kubernetes operations
#[derive(Error, Debug, Diagnostic)]
pub enum ControllerError {
    /// Object not found
    #[error("{kind} not found: {name}")]
    #[diagnostic(
        code(verticadb::controller::not_found),
        help("The object may have been deleted between enqueue and processing. This is usually harmless")
    )]
    NotFound {
        #[allow(unused)]
        kind: String,
        #[allow(unused)]
        name: String,
    },

    /// Optimistic concurrency conflict
    #[error("Conflict writing {kind} '{name}': the object was modified")]
    #[diagnostic(
        code(verticadb::controller::conflict),
        help("Re-fetch the object and re-apply the change. update_on_conflict does this automatically")
    )]
    Conflict {
        #[allow(unused)]
        kind: String,
        #[allow(unused)]
        name: String,
    },

    /// Conflict retries used up
    #[error("Gave up updating {kind} '{name}' after {attempts} conflicting attempts")]
    #[diagnostic(
        code(verticadb::controller::retries_exhausted),
        help("Another writer is updating this object continuously. The reconcile will be retried with backoff")
    )]
    RetriesExhausted {
        #[allow(unused)]
        kind: String,
        #[allow(unused)]
        name: String,
        #[allow(unused)]
        attempts: u32,
    },

    /// Sandbox ConfigMap failed validation
    #[error("Invalid sandbox ConfigMap '{name}': {reason}")]
    #[diagnostic(
        code(verticadb::controller::invalid_config_map),
        help("Set both the verticaDBName and sandboxName data keys. The sandbox name cannot be empty")
    )]
    InvalidConfigMap {
        #[allow(unused)]
        name: String,
        #[allow(unused)]
        reason: String,
    },

    /// Dispatcher RPC failed
    #[error("{verb} failed: {message}")]
    #[diagnostic(
        code(verticadb::controller::dispatch_failed),
        help("Check that the node management agent is reachable on the initiator pod and inspect its logs")
    )]
    Dispatch {
        #[allow(unused)]
        verb: String,
        #[allow(unused)]
        message: String,
    },

    /// Command inside a pod failed
    #[error("Exec in pod '{pod}' container '{container}' failed: {message}")]
    #[diagnostic(
        code(verticadb::controller::exec_failed),
        help("Verify the container is running. kubectl exec into the pod to reproduce")
    )]
    Exec {
        #[allow(unused)]
        pod: String,
        #[allow(unused)]
        container: String,
        #[allow(unused)]
        message: String,
    },

    /// Several independent operations failed
    #[error("{} operations failed: {}", .errors.len(), join_errors(.errors))]
    #[diagnostic(
        code(verticadb::controller::aggregate),
        help("Work that succeeded before the failure has been persisted. The remaining items are retried on the next pass")
    )]
    Aggregate {
        #[related]
        errors: Vec<ControllerError>,
    },

    /// Core model error
    #[error(transparent)]
    #[diagnostic(transparent)]
    CoreError(#[from] verticadb_core::CoreError),

    /// Kubernetes API error
    #[error(transparent)]
    #[diagnostic(code(verticadb::controller::kube_error))]
    KubeError(#[from] kube::Error),

    /// YAML parse error
    #[error(transparent)]
    #[diagnostic(code(verticadb::controller::yaml_error))]
    YamlError(#[from] serde_yaml::Error),

    /// HTTP transport error
    #[error(transparent)]
    #[diagnostic(code(verticadb::controller::http_error))]
    HttpError(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal controller error: {message}")]
    #[diagnostic(
        code(verticadb::controller::internal_error),
        help("This is likely a bug in verticadb-controller. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

fn join_errors(errors: &[ControllerError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, ControllerError>;

impl ControllerError {
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn retries_exhausted(kind: impl Into<String>, name: impl Into<String>, attempts: u32) -> Self {
        Self::RetriesExhausted {
            kind: kind.into(),
            name: name.into(),
            attempts,
        }
    }

    pub fn invalid_config_map(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfigMap {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn dispatch(verb: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Dispatch {
            verb: verb.into(),
            message: message.into(),
        }
    }

    pub fn exec(
        pod: impl Into<String>,
        container: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Exec {
            pod: pod.into(),
            container: container.into(),
            message: message.into(),
        }
    }

    /// Collapse a list of errors. A single error is returned as-is.
    pub fn aggregate(mut errors: Vec<ControllerError>) -> Self {
        if errors.len() == 1 {
            return errors.remove(0);
        }
        Self::Aggregate { errors }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
