//! Natural-language test instructions in, automation steps and Page Object
//! Model bundles out.
//!
//! [`Orchestrator::handle`] resolves one instruction against the caller's
//! current URL and steps, trying the local [`reflex`] shortcuts before the
//! hosted model. [`BundleGenerator::generate`] turns a finished step sequence
//! into Playwright source files. Neither holds state between calls; callers
//! keep it in a [`ProcessState`].

pub mod brain;
pub mod codegen;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod reflex;
pub mod session;
pub mod transport;
pub mod types;

pub use brain::RemoteResolver;
pub use codegen::BundleGenerator;
pub use config::ModelConfig;
pub use error::{PilotError, Result};
pub use orchestrator::Orchestrator;
pub use session::{ProcessState, StepPatch};
pub use transport::{HttpTransport, ModelRequest, ModelTransport};
pub use types::{ActionType, AutomationStep, ChatMessage, GeneratedFiles, ResolutionResult, Role};

use std::sync::Arc;

/// Wire an orchestrator and a bundle generator to one HTTP transport.
pub fn build_pipeline(config: ModelConfig) -> (Orchestrator, BundleGenerator) {
    let transport: Arc<dyn ModelTransport> = Arc::new(HttpTransport::new(&config));
    let orchestrator = Orchestrator::new(RemoteResolver::new(config.clone(), transport.clone()));
    let generator = BundleGenerator::new(config, transport);
    (orchestrator, generator)
}
