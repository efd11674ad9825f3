//! Turns a finished step sequence into a Playwright Page Object Model bundle.
//!
//! One model call, no retries and no timeout. Anything that goes wrong after
//! the configuration check becomes an `error.log` entry so callers always get
//! something to display.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use crate::brain::clean_json;
use crate::config::ModelConfig;
use crate::error::{PilotError, Result};
use crate::transport::{ModelRequest, ModelTransport};
use crate::types::{AutomationStep, GeneratedFiles};

pub const ERROR_LOG_FILE: &str = "error.log";
pub const ERROR_LOG_TEXT: &str = "Failed to generate code. Please try again.";

const CODEGEN_PROMPT: &str = r#"You are a Playwright Architecture Generator.
Create a robust Page Object Model (POM) project in **JavaScript (ES Modules)**.

SCENARIO STEPS:
{steps}

REQUIREMENTS:
1. Output a JSON object where keys are file paths and values are file content.
2. Structure:
   - 'tests/scenario.spec.js': The main test file. Imports pages, runs the test.
   - 'pages/[PageName].js': One file per unique 'page' found in steps.
3. Page Objects must be Javascript classes exporting a default or named class.
4. Use 'import/export' syntax (type="module").
5. In Page Objects, create semantic methods (e.g., login(user, pass), addToCart()) that group the raw steps.
   - IMPORTANT: If you see consecutive FILL/CLICK steps on the same page (like Login), group them into a single method (e.g. login()).
6. Return ONLY valid JSON.

Example Output format:
{
  "tests/scenario.spec.js": "import { test } from '@playwright/test'; ...",
  "pages/LoginPage.js": "export class LoginPage { ... }"
}"#;

/// Compact projection of a step for the prompt.
#[derive(Debug, Serialize)]
struct PromptStep<'a> {
    page: &'a str,
    action: &'a str,
    selector: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a str>,
    desc: &'a str,
    target: &'a str,
}

impl<'a> From<&'a AutomationStep> for PromptStep<'a> {
    fn from(step: &'a AutomationStep) -> Self {
        Self {
            page: &step.page_context,
            action: step.action_type.as_str(),
            selector: &step.simulated_selector,
            value: step.value.as_deref(),
            desc: &step.description,
            target: &step.target_element,
        }
    }
}

pub struct BundleGenerator {
    transport: Arc<dyn ModelTransport>,
    config: ModelConfig,
}

impl BundleGenerator {
    pub fn new(config: ModelConfig, transport: Arc<dyn ModelTransport>) -> Self {
        Self { transport, config }
    }

    /// Only a missing credential is an error; every other failure is folded
    /// into an `error.log` bundle.
    pub async fn generate(&self, steps: &[AutomationStep]) -> Result<GeneratedFiles> {
        if !self.config.is_configured() {
            return Err(PilotError::Configuration("API key is missing".into()));
        }

        if steps.is_empty() {
            return Ok(GeneratedFiles::from([(
                "README.md".to_string(),
                "No steps recorded yet. Add steps before generating code.\n".to_string(),
            )]));
        }

        match self.request_bundle(steps).await {
            Ok(files) => {
                info!(files = files.len(), "generated POM bundle");
                Ok(files)
            }
            Err(err) => {
                error!(error = %err, "code generation failed");
                Ok(error_bundle())
            }
        }
    }

    async fn request_bundle(&self, steps: &[AutomationStep]) -> Result<GeneratedFiles> {
        let request = ModelRequest {
            model: self.config.model.clone(),
            prompt: build_prompt(steps)?,
            json_response: true,
            temperature: None,
        };
        let text = self.transport.complete(&request).await?;
        serde_json::from_str(clean_json(&text)).map_err(|e| PilotError::Parse(e.to_string()))
    }
}

pub fn build_prompt(steps: &[AutomationStep]) -> Result<String> {
    let projected: Vec<PromptStep<'_>> = steps.iter().map(PromptStep::from).collect();
    let rendered = serde_json::to_string_pretty(&projected)?;
    Ok(CODEGEN_PROMPT.replace("{steps}", &rendered))
}

pub fn error_bundle() -> GeneratedFiles {
    GeneratedFiles::from([(ERROR_LOG_FILE.to_string(), ERROR_LOG_TEXT.to_string())])
}

/// Resolve a bundle key under `root`, refusing absolute paths and `..`.
pub fn bundle_path(root: &Path, key: &str) -> Result<PathBuf> {
    let relative = Path::new(key);
    let safe = !key.trim().is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !safe {
        return Err(PilotError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("refusing to write outside the output directory: {key}"),
        )));
    }
    Ok(root.join(relative))
}

/// Write every file of the bundle under `root`, creating directories as needed.
pub fn write_bundle(root: &Path, files: &GeneratedFiles) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(files.len());
    for (key, content) in files {
        let path = bundle_path(root, key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        written.push(path);
    }
    Ok(written)
}
