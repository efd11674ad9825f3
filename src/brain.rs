//! Remote resolution: ask the model to break an instruction into steps.
//!
//! The model's output is untrusted. Every attempt is bounded by a timeout,
//! failed attempts are retried with linear backoff, and whatever comes back is
//! validated and normalized before it becomes an [`AutomationStep`].

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ModelConfig;
use crate::error::{PilotError, Result};
use crate::transport::{ModelRequest, ModelTransport};
use crate::types::{
    ActionType, AutomationStep, DEFAULT_PAGE_CONTEXT, ResolutionResult, ensure_scheme, next_order,
};

const UNKNOWN_TARGET: &str = "Unknown Element";
const ROOT_SELECTOR: &str = "body";
const GENERATED_REASONING: &str = "AI Generated Sequence";

const RESOLVE_PROMPT: &str = r#"You are a Playwright Automation Expert generating a Page Object Model (POM) test.

User Instruction: "{instruction}"
Current URL: {current_url}
Previous Steps:
{previous_steps}

TASK:
1. Break down the User Instruction into a SEQUENCE of atomic Playwright actions.
2. Example: If user says "Login", generate 3 steps: FILL username, FILL password, CLICK login.
3. If user says "valid credentials" and you don't know them, use generic placeholders (e.g. "standard_user", "secret_sauce" for SauceDemo, or "user"/"password123").
4. Simulate scraping: infer robust selectors from standard web patterns (IDs, data-test attributes, aria-label).
5. Identify the 'pageContext' (Page Object Class Name) for EACH step.

Output JSON ONLY, no markdown and no explanation, with this structure:
{
  "steps": [
    {
      "actionType": "NAVIGATE|CLICK|FILL|ASSERT|WAIT|HOVER",
      "targetElement": "Human readable name (e.g. Username Input)",
      "simulatedSelector": "Robust selector (e.g. #user-name)",
      "value": "Input text or URL (optional)",
      "reasoning": "Why this selector?",
      "pageContext": "LoginPage"
    }
  ],
  "newUrl": "Predicted URL after ALL steps completed",
  "responseMessage": "Summary of actions taken"
}"#;

/// Resolves instructions through the hosted model.
pub struct RemoteResolver {
    transport: Arc<dyn ModelTransport>,
    config: ModelConfig,
}

impl RemoteResolver {
    pub fn new(config: ModelConfig, transport: Arc<dyn ModelTransport>) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub async fn resolve(
        &self,
        instruction: &str,
        current_url: &str,
        previous_steps: &[AutomationStep],
    ) -> Result<ResolutionResult> {
        if !self.config.is_configured() {
            warn!("API key is missing, cannot reach the model");
            return Err(PilotError::Configuration("API key is missing".into()));
        }

        let request = ModelRequest {
            model: self.config.model.clone(),
            prompt: build_prompt(instruction, current_url, previous_steps),
            json_response: true,
            temperature: Some(self.config.temperature),
        };

        let attempts = self.config.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.attempt(&request, instruction, current_url, previous_steps).await {
                Ok(result) => {
                    info!(
                        attempt,
                        steps = result.steps.len(),
                        new_url = %result.new_url,
                        "instruction resolved"
                    );
                    return Ok(result);
                }
                Err(err) if err.is_retryable() => {
                    warn!(attempt, error = %err, "attempt failed");
                    last_error = Some(err);
                    if attempt < attempts {
                        sleep(self.config.retry_delay_base * attempt).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or_else(|| PilotError::Transport("AI unresponsive.".into())))
    }

    async fn attempt(
        &self,
        request: &ModelRequest,
        instruction: &str,
        current_url: &str,
        previous_steps: &[AutomationStep],
    ) -> Result<ResolutionResult> {
        let text = timeout(self.config.request_timeout, self.transport.complete(request))
            .await
            .map_err(|_| PilotError::Timeout(self.config.request_timeout))??;
        debug!(chars = text.len(), "model replied");
        parse_resolution(&text, instruction, current_url, previous_steps)
    }
}

/// Fill the prompt template with the instruction and its context.
pub fn build_prompt(
    instruction: &str,
    current_url: &str,
    previous_steps: &[AutomationStep],
) -> String {
    let summary = if previous_steps.is_empty() {
        "Start of test".to_string()
    } else {
        previous_steps
            .iter()
            .map(AutomationStep::summary_line)
            .collect::<Vec<_>>()
            .join("\n")
    };

    RESOLVE_PROMPT
        .replace("{instruction}", instruction)
        .replace("{current_url}", current_url)
        .replace("{previous_steps}", &summary)
}

/// Strip markdown fences the model might add. Empty input becomes `{}`.
pub fn clean_json(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return "{}";
    }
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let body = body.strip_suffix("```").unwrap_or(body).trim();
    if body.is_empty() { "{}" } else { body }
}

/// Turn raw model text into a typed, normalized result.
pub fn parse_resolution(
    text: &str,
    instruction: &str,
    current_url: &str,
    previous_steps: &[AutomationStep],
) -> Result<ResolutionResult> {
    let data: Value =
        serde_json::from_str(clean_json(text)).map_err(|e| PilotError::Parse(e.to_string()))?;
    let object = data
        .as_object()
        .ok_or_else(|| PilotError::Shape("response is not a JSON object".into()))?;

    let raw_steps: &[Value] = match object.get("steps") {
        Some(Value::Array(steps)) => steps,
        _ if text_field(object, "actionType").is_some() => std::slice::from_ref(&data),
        _ => return Err(PilotError::Shape("no steps array in response".into())),
    };

    let predicted = text_field(object, "newUrl").unwrap_or_else(|| current_url.to_string());
    let new_url = ensure_scheme(&predicted);

    let base = next_order(previous_steps);
    let steps: Vec<AutomationStep> = raw_steps
        .iter()
        .enumerate()
        .map(|(index, raw)| to_step(raw, base + index, instruction, &new_url))
        .collect();

    let response_message = text_field(object, "responseMessage")
        .unwrap_or_else(|| format!("Executed {} steps.", steps.len()));

    Ok(ResolutionResult {
        steps,
        response_message,
        new_url,
    })
}

fn to_step(raw: &Value, order: usize, instruction: &str, url: &str) -> AutomationStep {
    let empty = Map::new();
    let fields = raw.as_object().unwrap_or(&empty);

    AutomationStep {
        id: Uuid::new_v4(),
        order,
        description: instruction.to_string(),
        action_type: text_field(fields, "actionType")
            .map(|a| ActionType::from_loose(&a))
            .unwrap_or_default(),
        target_element: text_field(fields, "targetElement")
            .unwrap_or_else(|| UNKNOWN_TARGET.to_string()),
        simulated_selector: text_field(fields, "simulatedSelector")
            .unwrap_or_else(|| ROOT_SELECTOR.to_string()),
        value: text_field(fields, "value"),
        url: url.to_string(),
        reasoning: text_field(fields, "reasoning")
            .unwrap_or_else(|| GENERATED_REASONING.to_string()),
        page_context: text_field(fields, "pageContext")
            .unwrap_or_else(|| DEFAULT_PAGE_CONTEXT.to_string()),
    }
}

/// A field as text. Empty strings and nulls count as missing, scalars are stringified.
fn text_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
