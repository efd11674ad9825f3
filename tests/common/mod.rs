use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pom_pilot::{
    ActionType, AutomationStep, BundleGenerator, ModelConfig, ModelRequest, ModelTransport,
    Orchestrator, PilotError, RemoteResolver, Result,
};
use uuid::Uuid;

/// A fake model that replays scripted replies and records prompts.
#[derive(Default)]
pub struct FakeModel {
    replies: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl FakeModel {
    pub fn replying(replies: Vec<&str>) -> Arc<Self> {
        let fake = Self::default();
        *fake.replies.lock().unwrap() = replies.into_iter().map(|r| Ok(r.to_string())).collect();
        Arc::new(fake)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ModelTransport for FakeModel {
    async fn complete(&self, request: &ModelRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(PilotError::Transport("no scripted reply".into())))
    }
}

pub fn configured() -> ModelConfig {
    ModelConfig::default().with_api_key(Some("test-key".into()))
}

pub fn orchestrator(fake: Arc<FakeModel>) -> Orchestrator {
    Orchestrator::new(RemoteResolver::new(configured(), fake))
}

pub fn generator(fake: Arc<FakeModel>) -> BundleGenerator {
    BundleGenerator::new(configured(), fake)
}

pub fn prior_steps(count: usize) -> Vec<AutomationStep> {
    (1..=count)
        .map(|order| AutomationStep {
            id: Uuid::new_v4(),
            order,
            description: "earlier instruction".into(),
            action_type: ActionType::Click,
            target_element: format!("Element {order}"),
            simulated_selector: format!("#el-{order}"),
            value: None,
            url: "https://shop.example".into(),
            reasoning: "prior".into(),
            page_context: "BasePage".into(),
        })
        .collect()
}
