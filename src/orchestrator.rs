use tracing::{debug, info};

use crate::brain::RemoteResolver;
use crate::error::Result;
use crate::reflex::{LocalResolver, default_reflexes};
use crate::types::{AutomationStep, ResolutionResult};

/// Public entry point: local reflexes first, then the model.
pub struct Orchestrator {
    reflexes: Vec<Box<dyn LocalResolver>>,
    remote: RemoteResolver,
}

impl Orchestrator {
    pub fn new(remote: RemoteResolver) -> Self {
        Self::with_reflexes(default_reflexes(), remote)
    }

    pub fn with_reflexes(reflexes: Vec<Box<dyn LocalResolver>>, remote: RemoteResolver) -> Self {
        Self { reflexes, remote }
    }

    /// Resolve one instruction against the caller's current state.
    ///
    /// A matching reflex short-circuits: the model is not called at all.
    /// Remote errors are returned as-is.
    pub async fn handle(
        &self,
        instruction: &str,
        current_url: &str,
        previous_steps: &[AutomationStep],
    ) -> Result<ResolutionResult> {
        for reflex in &self.reflexes {
            if let Some(mut result) = reflex.resolve(instruction, current_url) {
                result.stamp_orders(previous_steps);
                info!(new_url = %result.new_url, "fast-tracked instruction");
                return Ok(result);
            }
        }

        debug!(instruction, "no reflex matched, asking the model");
        self.remote
            .resolve(instruction, current_url, previous_steps)
            .await
    }
}
