// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

pub mod actor;
pub mod annotate_pod;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod health;
pub mod kube_client;
pub mod mock;
pub mod offline_upgrade;
pub mod podfacts;
pub mod restart;
pub mod sandbox;
pub mod scale_sts;
pub mod shutdown_spec;
pub mod status;
pub mod traits;
pub mod types;
pub mod update;
pub mod vclusterops;
pub mod vdb_controller;

#[cfg(test)]
pub(crate) mod testing;

// Re-export primary types
pub use actor::{run_actors, ReconcileActor, ReconcilePass};
pub use cache::CacheManager;
pub use config::{OperatorConfig, RetryPolicy};
pub use context::OperatorContext;
pub use error::{ControllerError, Result};
pub use events::{EventPublisher, KubeEventPublisher, NoopEventPublisher};
pub use mock::{MockDispatcher, MockObjectClient, MockPodRunner};
pub use podfacts::{PodFact, PodFacts};
pub use traits::{Dispatcher, ObjectClient, PodRunner};

// Re-export controller types
pub use health::{HealthServer, HealthState};
pub use kube_client::{KubeObjectClient, KubePodRunner};
pub use sandbox::{config_map_for_statefulset, SandboxController};
pub use vclusterops::VclusterOpsDispatcher;
pub use vdb_controller::VdbController;
