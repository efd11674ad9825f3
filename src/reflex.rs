//! Local shortcuts that resolve trivial instructions without the model.

use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use crate::types::{ActionType, AutomationStep, DEFAULT_PAGE_CONTEXT, ResolutionResult};

/// A deterministic resolver tried before the remote model.
pub trait LocalResolver: Send + Sync {
    /// `None` means "not mine", and the next resolver gets a turn.
    fn resolve(&self, instruction: &str, current_url: &str) -> Option<ResolutionResult>;
}

/// Verb phrase followed by a full URL or a bare `label.tld` token, and nothing else.
static NAVIGATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:navigate\s+to|go\s+to|open|visit|visitar|navegar\s+a|ir\s+a)\s+(https?://\S+|[a-z0-9.-]+\.[a-z]{2,})\s*$",
    )
    .expect("navigation pattern is valid")
});

/// Page object guesses, first match wins.
const PAGE_RULES: &[(&[&str], &str)] = &[
    (&["login"], "LoginPage"),
    (&["cart"], "CartPage"),
    (&["inventory", "product"], "InventoryPage"),
    (&["saucedemo"], "LoginPage"),
];

pub const FAST_TRACK_REASONING: &str = "Fast-tracked: Detected direct navigation.";

/// Handles "go to example.com" style instructions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NavigationReflex;

impl LocalResolver for NavigationReflex {
    fn resolve(&self, instruction: &str, _current_url: &str) -> Option<ResolutionResult> {
        let lower = instruction.trim().to_lowercase();
        let captures = NAVIGATION.captures(&lower)?;
        let target = captures.get(1)?.as_str();

        let url = if target.contains("://") {
            target.to_string()
        } else {
            format!("https://{target}")
        };
        let page_context = classify_page(&url);

        let step = AutomationStep {
            id: Uuid::new_v4(),
            order: 1,
            description: instruction.to_string(),
            action_type: ActionType::Navigate,
            target_element: "Browser Window".to_string(),
            simulated_selector: "/".to_string(),
            value: Some(url.clone()),
            url: url.clone(),
            reasoning: FAST_TRACK_REASONING.to_string(),
            page_context: page_context.to_string(),
        };

        Some(ResolutionResult {
            response_message: format!("Navigating to {url} ({page_context})"),
            new_url: url,
            steps: vec![step],
        })
    }
}

/// Guess the page object a URL belongs to.
pub fn classify_page(url: &str) -> &'static str {
    let url = url.to_lowercase();
    PAGE_RULES
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| url.contains(*n)))
        .map(|(_, page)| *page)
        .unwrap_or(DEFAULT_PAGE_CONTEXT)
}

/// The default local resolver chain.
pub fn default_reflexes() -> Vec<Box<dyn LocalResolver>> {
    vec![Box::new(NavigationReflex)]
}
