use crate::config::OperatorConfig;
use crate::events::EventPublisher;
use crate::traits::{Dispatcher, ObjectClient, PodRunner};
use std::sync::Arc;

/// Handles shared by every reconciler of one controller
#[derive(Clone)]
pub struct OperatorContext {
    pub client: Arc<dyn ObjectClient>,
    pub runner: Arc<dyn PodRunner>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub events: Arc<dyn EventPublisher>,
    pub config: OperatorConfig,
}

impl OperatorContext {
    pub fn new(
        client: Arc<dyn ObjectClient>,
        runner: Arc<dyn PodRunner>,
        dispatcher: Arc<dyn Dispatcher>,
        events: Arc<dyn EventPublisher>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            client,
            runner,
            dispatcher,
            events,
            config,
        }
    }
}
