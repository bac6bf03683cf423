use crate::error::Result;
use crate::podfacts::PodFacts;
use async_trait::async_trait;
use tracing::{debug, info};
use verticadb_core::{Outcome, VerticaDB};

/// State threaded through one reconcile pass
pub struct ReconcilePass {
    /// Latest copy of the VerticaDB. Actors that write it store the result
    /// here so later actors see the new resourceVersion.
    pub vdb: VerticaDB,
    /// Facts for the pass's scope (main cluster or one sandbox)
    pub pfacts: PodFacts,
}

impl ReconcilePass {
    pub fn new(vdb: VerticaDB, pfacts: PodFacts) -> Self {
        Self { vdb, pfacts }
    }
}

/// One step of a controller's reconcile chain
#[async_trait]
pub trait ReconcileActor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn reconcile(&self, pass: &mut ReconcilePass) -> Result<Outcome>;
}

/// Run actors in order, stopping at the first error or aborting outcome
pub async fn run_actors(actors: &[Box<dyn ReconcileActor>], pass: &mut ReconcilePass) -> Result<Outcome> {
    for actor in actors {
        debug!("Running actor {}", actor.name());
        let outcome = actor.reconcile(pass).await?;
        if outcome.aborts_chain() {
            info!("Actor {} ended the pass with {:?}", actor.name(), outcome);
            return Ok(outcome);
        }
    }
    Ok(Outcome::Continue)
}
