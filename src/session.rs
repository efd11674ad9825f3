//! Caller-side state: the running step sequence, URL and chat log.
//!
//! The pipeline itself is stateless. A `ProcessState` is what the CLI and the
//! studio keep between instructions, and it is saved as pretty JSON.

use std::fs::OpenOptions;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::codegen::BundleGenerator;
use crate::error::{PilotError, Result};
use crate::orchestrator::Orchestrator;
use crate::types::{
    ActionType, AutomationStep, BLANK_PAGE, ChatMessage, DEFAULT_PAGE_CONTEXT, GeneratedFiles,
    ResolutionResult, next_order,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessState {
    pub is_processing: bool,
    pub current_url: String,
    pub steps: Vec<AutomationStep>,
    pub chat_history: Vec<ChatMessage>,
    pub generated_files: Option<GeneratedFiles>,
    pub error: Option<String>,
}

impl Default for ProcessState {
    fn default() -> Self {
        Self {
            is_processing: false,
            current_url: BLANK_PAGE.to_string(),
            steps: Vec::new(),
            chat_history: Vec::new(),
            generated_files: None,
            error: None,
        }
    }
}

/// Partial edit of a step, as made by a step editor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepPatch {
    pub description: Option<String>,
    pub action_type: Option<ActionType>,
    pub target_element: Option<String>,
    pub simulated_selector: Option<String>,
    pub value: Option<String>,
    pub url: Option<String>,
    pub reasoning: Option<String>,
    pub page_context: Option<String>,
}

impl ProcessState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve an instruction and fold the outcome into this state.
    ///
    /// Returns the new steps; failures are also recorded in the chat log.
    pub async fn submit(
        &mut self,
        orchestrator: &Orchestrator,
        instruction: &str,
    ) -> Result<Vec<AutomationStep>> {
        let (current_url, steps) = self.begin_instruction(instruction);
        let outcome = orchestrator.handle(instruction, &current_url, &steps).await;
        self.finish_instruction(outcome)
    }

    /// Record the user's instruction and mark the state busy.
    ///
    /// Returns the URL and steps to resolve against, so the caller can run the
    /// model call without holding on to the state.
    pub fn begin_instruction(&mut self, instruction: &str) -> (String, Vec<AutomationStep>) {
        self.chat_history.push(ChatMessage::user(instruction));
        self.is_processing = true;
        self.error = None;
        (self.current_url.clone(), self.steps.clone())
    }

    pub fn finish_instruction(
        &mut self,
        outcome: Result<ResolutionResult>,
    ) -> Result<Vec<AutomationStep>> {
        match outcome {
            Ok(result) => Ok(self.apply_result(result)),
            Err(err) => {
                self.apply_failure(&err);
                Err(err)
            }
        }
    }

    pub fn apply_result(&mut self, result: ResolutionResult) -> Vec<AutomationStep> {
        self.is_processing = false;
        self.chat_history.push(ChatMessage::ai(result.response_message));
        self.current_url = result.new_url;
        self.steps.extend(result.steps.iter().cloned());
        result.steps
    }

    pub fn apply_failure(&mut self, err: &PilotError) {
        let message = err.to_string();
        self.is_processing = false;
        self.chat_history.push(ChatMessage::ai(format!(
            "⚠️ {message}. You can try again or add the step manually below."
        )));
        self.error = Some(message);
    }

    /// Generate the POM bundle for the current steps and keep it.
    pub async fn generate_code(&mut self, generator: &BundleGenerator) -> Result<&GeneratedFiles> {
        let steps = self.begin_generate();
        let outcome = generator.generate(&steps).await;
        self.finish_generate(outcome)
    }

    /// Mark the state busy and snapshot the steps to generate from.
    pub fn begin_generate(&mut self) -> Vec<AutomationStep> {
        self.is_processing = true;
        self.steps.clone()
    }

    pub fn finish_generate(&mut self, outcome: Result<GeneratedFiles>) -> Result<&GeneratedFiles> {
        self.is_processing = false;
        match outcome {
            Ok(files) => Ok(&*self.generated_files.insert(files)),
            Err(err) => {
                self.error = Some("Failed to generate code.".to_string());
                Err(err)
            }
        }
    }

    /// Append a placeholder step for the user to edit.
    pub fn add_manual_step(&mut self) -> &AutomationStep {
        let step = AutomationStep {
            id: Uuid::new_v4(),
            order: next_order(&self.steps),
            description: "Manual Step".to_string(),
            action_type: ActionType::Click,
            target_element: "Target Element".to_string(),
            simulated_selector: ".my-selector".to_string(),
            value: Some(String::new()),
            url: self.current_url.clone(),
            reasoning: "Manually added by user".to_string(),
            page_context: DEFAULT_PAGE_CONTEXT.to_string(),
        };
        self.steps.push(step);
        &self.steps[self.steps.len() - 1]
    }

    /// Returns `false` when no step has this id.
    pub fn update_step(&mut self, id: Uuid, patch: StepPatch) -> bool {
        let Some(step) = self.steps.iter_mut().find(|s| s.id == id) else {
            return false;
        };
        if let Some(v) = patch.description {
            step.description = v;
        }
        if let Some(v) = patch.action_type {
            step.action_type = v;
        }
        if let Some(v) = patch.target_element {
            step.target_element = v;
        }
        if let Some(v) = patch.simulated_selector {
            step.simulated_selector = v;
        }
        if let Some(v) = patch.value {
            step.value = Some(v);
        }
        if let Some(v) = patch.url {
            step.url = v;
        }
        if let Some(v) = patch.reasoning {
            step.reasoning = v;
        }
        if let Some(v) = patch.page_context.filter(|p| !p.trim().is_empty()) {
            step.page_context = v;
        }
        true
    }

    /// Returns `false` when no step has this id.
    pub fn delete_step(&mut self, id: Uuid) -> bool {
        let before = self.steps.len();
        self.steps.retain(|s| s.id != id);
        self.steps.len() != before
    }

    /// Look a step up by full id or by a unique id prefix.
    pub fn find_step(&self, id_or_prefix: &str) -> Option<&AutomationStep> {
        let mut matches = self
            .steps
            .iter()
            .filter(|s| s.id.to_string().starts_with(id_or_prefix));
        match (matches.next(), matches.next()) {
            (Some(step), None) if !id_or_prefix.is_empty() => Some(step),
            _ => None,
        }
    }

    /// A missing file yields a fresh state.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let mut state: Self = serde_json::from_reader(reader)?;
        if state.is_processing {
            warn!(path = %path.display(), "session was saved mid-request, clearing flag");
            state.is_processing = false;
        }
        Ok(state)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;
    use std::time::Duration;

    fn resolved(orders: &[usize], url: &str) -> ResolutionResult {
        let steps = orders
            .iter()
            .map(|&order| AutomationStep {
                id: Uuid::new_v4(),
                order,
                description: "login".into(),
                action_type: ActionType::Fill,
                target_element: "Input".into(),
                simulated_selector: "#in".into(),
                value: Some("x".into()),
                url: url.into(),
                reasoning: "r".into(),
                page_context: "LoginPage".into(),
            })
            .collect();
        ResolutionResult {
            steps,
            response_message: "done".into(),
            new_url: url.into(),
        }
    }

    #[test]
    fn test_new_state_is_blank() {
        let state = ProcessState::new();
        assert_eq!(state.current_url, "about:blank");
        assert!(state.steps.is_empty());
        assert!(state.generated_files.is_none());
    }

    #[test]
    fn test_apply_result_appends() {
        let mut state = ProcessState::new();
        state.is_processing = true;
        let added = state.apply_result(resolved(&[1, 2], "https://a.com"));
        assert_eq!(added.len(), 2);
        assert_eq!(state.steps.len(), 2);
        assert_eq!(state.current_url, "https://a.com");
        assert!(!state.is_processing);
        assert_eq!(state.chat_history.last().unwrap().role, Role::Ai);
        assert_eq!(state.chat_history.last().unwrap().content, "done");
    }

    #[test]
    fn test_apply_failure_records_error() {
        let mut state = ProcessState::new();
        state.apply_failure(&PilotError::Timeout(Duration::from_secs(45)));
        let error = state.error.clone().unwrap();
        assert!(error.contains("timed out"));
        let last = state.chat_history.last().unwrap();
        assert!(last.content.starts_with("⚠️ "));
        assert!(last.content.ends_with("add the step manually below."));
    }

    #[test]
    fn test_begin_instruction_snapshots_context() {
        let mut state = ProcessState::new();
        state.apply_result(resolved(&[1, 2], "https://a.com"));
        state.error = Some("old".into());

        let (url, steps) = state.begin_instruction("click login");
        assert_eq!(url, "https://a.com");
        assert_eq!(steps, state.steps);
        assert!(state.is_processing);
        assert!(state.error.is_none());
        assert_eq!(state.chat_history.last().unwrap().content, "click login");

        // A manual edit made while the model is busy survives the result.
        state.add_manual_step();
        let added = state
            .finish_instruction(Ok(resolved(&[3], "https://a.com/cart")))
            .unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(state.steps.len(), 4);
        assert_eq!(state.current_url, "https://a.com/cart");
        assert!(!state.is_processing);
    }

    #[test]
    fn test_finish_instruction_failure() {
        let mut state = ProcessState::new();
        state.begin_instruction("click login");
        let err = state
            .finish_instruction(Err(PilotError::Transport("down".into())))
            .unwrap_err();
        assert!(matches!(err, PilotError::Transport(_)));
        assert!(!state.is_processing);
        assert!(state.error.as_deref().unwrap().contains("down"));
        assert_eq!(state.chat_history.len(), 2);
    }

    #[test]
    fn test_generate_halves() {
        let mut state = ProcessState::new();
        state.apply_result(resolved(&[1], "https://a.com"));
        let steps = state.begin_generate();
        assert_eq!(steps.len(), 1);
        assert!(state.is_processing);

        let files = GeneratedFiles::from([("pages/BasePage.js".to_string(), "x".to_string())]);
        let kept = state.finish_generate(Ok(files)).unwrap();
        assert!(kept.contains_key("pages/BasePage.js"));
        assert!(!state.is_processing);

        state.begin_generate();
        assert!(state.finish_generate(Err(PilotError::Configuration("key".into()))).is_err());
        assert_eq!(state.error.as_deref(), Some("Failed to generate code."));
        assert!(state.generated_files.is_some());
    }

    #[test]
    fn test_manual_step_takes_next_order() {
        let mut state = ProcessState::new();
        state.apply_result(resolved(&[1, 2], "https://a.com"));
        let step = state.add_manual_step().clone();
        assert_eq!(step.order, 3);
        assert_eq!(step.action_type, ActionType::Click);
        assert_eq!(step.url, "https://a.com");
        assert_eq!(step.page_context, "BasePage");
    }

    #[test]
    fn test_update_and_delete() {
        let mut state = ProcessState::new();
        let id = state.add_manual_step().id;

        let patch = StepPatch {
            action_type: Some(ActionType::Hover),
            simulated_selector: Some("#menu".into()),
            page_context: Some("  ".into()),
            ..Default::default()
        };
        assert!(state.update_step(id, patch));
        assert_eq!(state.steps[0].action_type, ActionType::Hover);
        assert_eq!(state.steps[0].simulated_selector, "#menu");
        assert_eq!(state.steps[0].page_context, "BasePage");

        assert!(!state.update_step(Uuid::new_v4(), StepPatch::default()));
        assert!(state.delete_step(id));
        assert!(!state.delete_step(id));
        assert!(state.steps.is_empty());
    }

    #[test]
    fn test_find_step_by_prefix() {
        let mut state = ProcessState::new();
        let id = state.add_manual_step().id;
        let full = id.to_string();
        assert_eq!(state.find_step(&full[..8]).map(|s| s.id), Some(id));
        assert!(state.find_step("").is_none());
        assert!(state.find_step("zzzz").is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/session.json");

        let mut state = ProcessState::new();
        state.apply_result(resolved(&[1], "https://a.com"));
        state.is_processing = true;
        state.save(&path).unwrap();

        let loaded = ProcessState::load(&path).unwrap();
        assert_eq!(loaded.steps, state.steps);
        assert_eq!(loaded.current_url, "https://a.com");
        assert!(!loaded.is_processing);
    }

    #[test]
    fn test_load_missing_file_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let state = ProcessState::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(state, ProcessState::new());
    }
}
