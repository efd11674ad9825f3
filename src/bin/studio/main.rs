mod face;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use dotenvy::dotenv;
use face::{StudioCommand, StudioEvent};
use pom_pilot::{BundleGenerator, ModelConfig, Orchestrator, ProcessState, build_pipeline};
use tokio::sync::{Mutex, broadcast};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pom_pilot=info,studio=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ModelConfig::from_env();
    if !config.is_configured() {
        warn!("no API key configured, only direct navigation will resolve");
    }
    let (orchestrator, generator) = build_pipeline(config);

    let session_path = std::env::var_os("POM_PILOT_SESSION").map(PathBuf::from);
    let initial = match &session_path {
        Some(path) => ProcessState::load(path)?,
        None => ProcessState::new(),
    };
    let session = Arc::new(Mutex::new(initial));

    let (mut cmd_rx, event_tx) = face::start_server(session.clone()).await?;
    info!("Studio ready. Waiting for instructions...");

    // Commands run one at a time so every call sees the latest step sequence.
    // The session is only locked around the model call, never across it.
    while let Some(command) = cmd_rx.recv().await {
        match command {
            StudioCommand::Instruction(instruction) => {
                run_instruction(&session, &orchestrator, &instruction, &event_tx).await;
            }
            StudioCommand::Generate => {
                run_generate(&session, &generator, &event_tx).await;
            }
        }
        if let Some(path) = &session_path {
            if let Err(e) = session.lock().await.save(path) {
                error!(error = %e, path = %path.display(), "failed to save session");
            }
        }
        let _ = event_tx.send(StudioEvent::Ready);
    }

    Ok(())
}

async fn run_instruction(
    session: &Mutex<ProcessState>,
    orchestrator: &Orchestrator,
    instruction: &str,
    events: &broadcast::Sender<StudioEvent>,
) {
    let _ = events.send(StudioEvent::Thinking);
    let (current_url, steps) = session.lock().await.begin_instruction(instruction);
    let outcome = orchestrator.handle(instruction, &current_url, &steps).await;

    let mut state = session.lock().await;
    match state.finish_instruction(outcome) {
        Ok(steps) => {
            let message = state
                .chat_history
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            let _ = events.send(StudioEvent::Steps {
                message,
                new_url: state.current_url.clone(),
                steps,
            });
        }
        Err(e) => {
            warn!(error = %e, "instruction failed");
            let message = state
                .chat_history
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_else(|| e.to_string());
            let _ = events.send(StudioEvent::Error { message });
        }
    }
}

async fn run_generate(
    session: &Mutex<ProcessState>,
    generator: &BundleGenerator,
    events: &broadcast::Sender<StudioEvent>,
) {
    let _ = events.send(StudioEvent::Thinking);
    let steps = session.lock().await.begin_generate();
    let outcome = generator.generate(&steps).await;

    match session.lock().await.finish_generate(outcome) {
        Ok(files) => {
            let _ = events.send(StudioEvent::Code {
                files: files.clone(),
            });
        }
        Err(e) => {
            let _ = events.send(StudioEvent::Error {
                message: format!("Failed to generate code: {e}"),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pom_pilot::{ModelRequest, ModelTransport, RemoteResolver};
    use tokio::sync::Notify;

    /// Replies once the test lets it, so the test can look at the session mid-call.
    struct Gated {
        reply: String,
        entered: Notify,
        release: Notify,
    }

    impl Gated {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                entered: Notify::new(),
                release: Notify::new(),
            })
        }
    }

    #[async_trait]
    impl ModelTransport for Gated {
        async fn complete(&self, _request: &ModelRequest) -> pom_pilot::Result<String> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(self.reply.clone())
        }
    }

    fn config() -> ModelConfig {
        ModelConfig::default().with_api_key(Some("test-key".into()))
    }

    #[tokio::test]
    async fn test_session_is_free_while_the_model_works() {
        let model = Gated::new(r#"{"steps":[{"actionType":"CLICK"}],"newUrl":"shop.example"}"#);
        let orchestrator = Orchestrator::new(RemoteResolver::new(config(), model.clone()));
        let session = Mutex::new(ProcessState::new());
        let (events, mut rx) = broadcast::channel(16);

        let observe = async {
            model.entered.notified().await;
            {
                let state = session.try_lock().expect("session locked during model call");
                assert!(state.is_processing);
                assert_eq!(state.chat_history.len(), 1);
            }
            model.release.notify_one();
        };
        tokio::join!(
            run_instruction(&session, &orchestrator, "click checkout", &events),
            observe
        );

        let state = session.lock().await;
        assert!(!state.is_processing);
        assert_eq!(state.steps.len(), 1);
        assert_eq!(state.current_url, "https://shop.example");
        assert!(matches!(rx.recv().await, Ok(StudioEvent::Thinking)));
        assert!(matches!(rx.recv().await, Ok(StudioEvent::Steps { .. })));
    }

    #[tokio::test]
    async fn test_generate_releases_session_during_call() {
        let model = Gated::new(r#"{"pages/BasePage.js":"export class BasePage {}"}"#);
        let generator = BundleGenerator::new(config(), model.clone());
        let mut initial = ProcessState::new();
        initial.add_manual_step();
        let session = Mutex::new(initial);
        let (events, mut rx) = broadcast::channel(16);

        let observe = async {
            model.entered.notified().await;
            assert!(session.try_lock().is_ok(), "session locked during model call");
            model.release.notify_one();
        };
        tokio::join!(run_generate(&session, &generator, &events), observe);

        let state = session.lock().await;
        assert!(!state.is_processing);
        let files = state.generated_files.as_ref().unwrap();
        assert!(files.contains_key("pages/BasePage.js"));
        assert!(matches!(rx.recv().await, Ok(StudioEvent::Thinking)));
        assert!(matches!(rx.recv().await, Ok(StudioEvent::Code { .. })));
    }
}
