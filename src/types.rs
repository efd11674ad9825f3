use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The closed set of actions a step can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Navigate,
    Click,
    Fill,
    Assert,
    Wait,
    Hover,
    #[default]
    Unknown,
}

impl ActionType {
    pub const ALL: [ActionType; 7] = [
        ActionType::Navigate,
        ActionType::Click,
        ActionType::Fill,
        ActionType::Assert,
        ActionType::Wait,
        ActionType::Hover,
        ActionType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Navigate => "NAVIGATE",
            ActionType::Click => "CLICK",
            ActionType::Fill => "FILL",
            ActionType::Assert => "ASSERT",
            ActionType::Wait => "WAIT",
            ActionType::Hover => "HOVER",
            ActionType::Unknown => "UNKNOWN",
        }
    }

    /// Lenient lookup used on model output. Anything unrecognized is `Unknown`.
    pub fn from_loose(raw: &str) -> Self {
        let wanted = raw.trim();
        Self::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(wanted))
            .unwrap_or(ActionType::Unknown)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One atomic automation action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationStep {
    pub id: Uuid,
    /// 1-based position in the whole sequence.
    pub order: usize,
    pub description: String,
    pub action_type: ActionType,
    pub target_element: String,
    pub simulated_selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub url: String,
    pub reasoning: String,
    pub page_context: String,
}

impl AutomationStep {
    /// One-line summary fed back to the model as context.
    pub fn summary_line(&self) -> String {
        format!(
            "[{}] {} -> {}",
            self.page_context, self.action_type, self.target_element
        )
    }
}

/// Order the next appended step should receive: one past the length of the
/// sequence it is appended to. Callers serialize appends to one sequence.
pub fn next_order(steps: &[AutomationStep]) -> usize {
    steps.len() + 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Ai,
}

/// A message in the chat log. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Ai,
            content: content.into(),
        }
    }
}

/// File path -> source text.
pub type GeneratedFiles = BTreeMap<String, String>;

/// What resolving one instruction produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionResult {
    pub steps: Vec<AutomationStep>,
    pub response_message: String,
    pub new_url: String,
}

impl ResolutionResult {
    /// Renumber the batch so it continues after `previous`.
    pub fn stamp_orders(&mut self, previous: &[AutomationStep]) {
        let base = next_order(previous);
        for (index, step) in self.steps.iter_mut().enumerate() {
            step.order = base + index;
        }
    }
}

pub const BLANK_PAGE: &str = "about:blank";
pub const DEFAULT_PAGE_CONTEXT: &str = "BasePage";

/// Prefix `https://` onto scheme-less, domain-looking URLs.
///
/// Empty strings and `about:blank` pass through untouched. Applying it twice
/// gives the same result as applying it once.
pub fn ensure_scheme(url: &str) -> String {
    let trimmed = url.trim();
    let leave_alone = trimmed.is_empty()
        || trimmed == BLANK_PAGE
        || has_scheme(trimmed)
        || !trimmed.contains('.');
    if leave_alone {
        return trimmed.to_string();
    }
    format!("https://{trimmed}")
}

fn has_scheme(url: &str) -> bool {
    url.contains("://") || url.starts_with("about:")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(order: usize) -> AutomationStep {
        AutomationStep {
            id: Uuid::new_v4(),
            order,
            description: "test".into(),
            action_type: ActionType::Click,
            target_element: "Button".into(),
            simulated_selector: "#btn".into(),
            value: None,
            url: BLANK_PAGE.into(),
            reasoning: "because".into(),
            page_context: DEFAULT_PAGE_CONTEXT.into(),
        }
    }

    #[test]
    fn test_action_type_wire_names() {
        let json = serde_json::to_string(&ActionType::Navigate).unwrap();
        assert_eq!(json, "\"NAVIGATE\"");
        let action: ActionType = serde_json::from_str("\"HOVER\"").unwrap();
        assert_eq!(action, ActionType::Hover);
    }

    #[test]
    fn test_action_type_from_loose() {
        assert_eq!(ActionType::from_loose("fill"), ActionType::Fill);
        assert_eq!(ActionType::from_loose(" Click "), ActionType::Click);
        assert_eq!(ActionType::from_loose("SCROLL"), ActionType::Unknown);
        assert_eq!(ActionType::from_loose(""), ActionType::Unknown);
    }

    #[test]
    fn test_step_serializes_camel_case() {
        let json = serde_json::to_value(step(1)).unwrap();
        assert_eq!(json["actionType"], "CLICK");
        assert_eq!(json["pageContext"], "BasePage");
        assert_eq!(json["simulatedSelector"], "#btn");
        assert!(json.get("value").is_none());
    }

    #[test]
    fn test_summary_line() {
        assert_eq!(step(1).summary_line(), "[BasePage] CLICK -> Button");
    }

    #[test]
    fn test_next_order_contiguous() {
        assert_eq!(next_order(&[]), 1);
        assert_eq!(next_order(&[step(1), step(2)]), 3);
    }

    #[test]
    fn test_next_order_follows_length_not_existing_orders() {
        // Step 2 of 1..=3 was deleted.
        assert_eq!(next_order(&[step(1), step(3)]), 3);
    }

    #[test]
    fn test_stamp_orders_counts_from_length() {
        let mut result = ResolutionResult {
            steps: vec![step(1), step(1)],
            response_message: "ok".into(),
            new_url: BLANK_PAGE.into(),
        };
        result.stamp_orders(&[step(1), step(3)]);
        let orders: Vec<_> = result.steps.iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![3, 4]);
    }

    #[test]
    fn test_ensure_scheme() {
        assert_eq!(ensure_scheme("shop.example"), "https://shop.example");
        assert_eq!(ensure_scheme("http://a.com"), "http://a.com");
        assert_eq!(ensure_scheme("about:blank"), "about:blank");
        assert_eq!(ensure_scheme(""), "");
        assert_eq!(ensure_scheme("localhost"), "localhost");
        assert_eq!(ensure_scheme("httpbin.org"), "https://httpbin.org");
    }

    #[test]
    fn test_ensure_scheme_is_idempotent() {
        for url in [
            "shop.example",
            "https://x.io/path",
            "about:blank",
            "",
            "nodot",
            "ftp://files.example",
        ] {
            let once = ensure_scheme(url);
            assert_eq!(ensure_scheme(&once), once, "not idempotent for {url:?}");
        }
    }

    #[test]
    fn test_chat_message_roles() {
        assert_eq!(ChatMessage::user("hi").role, Role::User);
        let json = serde_json::to_value(ChatMessage::ai("ok")).unwrap();
        assert_eq!(json["role"], "ai");
    }
}
