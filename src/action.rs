//! Action model — the unit of work the pipeline executes against a page.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What an action does, with its kind-specific payload.
///
/// Serialized with a `kind` tag, so the wire shape of a search action is
/// `{"kind": "search", "term": "red t-shirt"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    /// Locate the page's search input, fill it, and submit.
    Search { term: String },
    /// Locate the first organic product result and click it.
    FindAndClickProduct { term: String },
    /// Navigate directly to a URL.
    NavigateToUrl { url: String },
    /// Click the first usable element among an explicit selector list.
    Click { selectors: Vec<String> },
    /// Follow the first usable element among a selector list, anchor-aware.
    Navigate { selectors: Vec<String> },
    /// Read-only: extract bounded summaries of matching elements.
    Analyze { selectors: Vec<String> },
}

impl ActionKind {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Search { .. } => "search",
            Self::FindAndClickProduct { .. } => "find_and_click_product",
            Self::NavigateToUrl { .. } => "navigate_to_url",
            Self::Click { .. } => "click",
            Self::Navigate { .. } => "navigate",
            Self::Analyze { .. } => "analyze",
        }
    }

    /// Whether executing this kind may tear down the page context.
    ///
    /// After one of these succeeds the processor must not start the next
    /// cycle in the same call stack; the queue is resumed from durable
    /// storage once the new page has loaded.
    pub fn expects_navigation(&self) -> bool {
        !matches!(self, Self::Analyze { .. })
    }

    /// Human-readable summary used in feedback messages.
    pub fn summary(&self) -> String {
        match self {
            Self::Search { term } => format!("search for \"{}\"", term),
            Self::FindAndClickProduct { term } => {
                format!("click the first product for \"{}\"", term)
            }
            Self::NavigateToUrl { url } => format!("navigate to {}", url),
            Self::Click { selectors } => format!("click ({} selectors)", selectors.len()),
            Self::Navigate { selectors } => format!("navigate ({} selectors)", selectors.len()),
            Self::Analyze { selectors } => format!("analyze ({} selectors)", selectors.len()),
        }
    }
}

/// Enqueue-time shape: the kind plus an optional retry override.
///
/// Ids, timestamps, and counters are assigned by the queue at enqueue
/// time, never by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ActionSpec {
    #[serde(flatten)]
    pub kind: ActionKind,

    /// Overrides the pipeline's default max retries when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl ActionSpec {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            max_retries: None,
        }
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = Some(max);
        self
    }
}

/// Lifecycle flag surfaced to the UI. The store only ever holds pending
/// and executing actions; terminal states exist in feedback messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

/// A queued unit of DOM automation work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Unique id, assigned at enqueue time.
    pub id: Uuid,

    #[serde(flatten)]
    pub kind: ActionKind,

    /// Enqueue timestamp; expiry is measured from here, independent of
    /// retries.
    pub enqueued_at: DateTime<Utc>,

    pub retry_count: u32,
    pub max_retries: u32,
    pub status: ActionStatus,
}

impl Action {
    /// Materialize a spec into a queued action.
    pub fn from_spec(spec: ActionSpec, default_max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            max_retries: spec.max_retries.unwrap_or(default_max_retries),
            kind: spec.kind,
            enqueued_at: Utc::now(),
            retry_count: 0,
            status: ActionStatus::Pending,
        }
    }

    /// Whether another retry attempt is allowed.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Whether the action has outlived the expiry window as of `now`.
    pub fn is_expired(&self, window_ms: u64, now: DateTime<Utc>) -> bool {
        now - self.enqueued_at > Duration::milliseconds(window_ms as i64)
    }
}

/// Result of one executor attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecOutcome {
    pub success: bool,
    pub message: Option<String>,
}

impl ExecOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

/// Terminal disposition of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Expired,
    MaxRetriesExceeded,
    Failed,
}

/// One per-action terminal report, emitted exactly once per action.
/// Transient retries are logged but never surfaced here.
#[derive(Debug, Clone)]
pub struct Feedback {
    pub action: Action,
    pub outcome: Outcome,
    pub message: String,
}

impl Feedback {
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tag_round_trip() {
        let kind = ActionKind::Search {
            term: "red t-shirt".into(),
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["kind"], "search");
        assert_eq!(json["term"], "red t-shirt");

        let back: ActionKind = serde_json::from_value(json).unwrap();
        assert_eq!(back, kind);
    }

    #[test]
    fn spec_parses_without_retry_override() {
        let spec: ActionSpec =
            serde_json::from_str(r#"{"kind": "navigate_to_url", "url": "https://example.com"}"#)
                .unwrap();
        assert_eq!(spec.kind.name(), "navigate_to_url");
        assert!(spec.max_retries.is_none());
    }

    #[test]
    fn from_spec_assigns_fresh_state() {
        let spec = ActionSpec::new(ActionKind::Analyze {
            selectors: vec![".price".into()],
        });
        let action = Action::from_spec(spec, 2);
        assert_eq!(action.retry_count, 0);
        assert_eq!(action.max_retries, 2);
        assert_eq!(action.status, ActionStatus::Pending);
    }

    #[test]
    fn retry_override_wins_over_default() {
        let spec = ActionSpec::new(ActionKind::Click { selectors: vec![] }).with_max_retries(5);
        let action = Action::from_spec(spec, 2);
        assert_eq!(action.max_retries, 5);
    }

    #[test]
    fn expiry_is_measured_from_enqueue_time() {
        let mut action = Action::from_spec(
            ActionSpec::new(ActionKind::Search { term: "x".into() }),
            2,
        );
        let now = Utc::now();
        assert!(!action.is_expired(120_000, now));

        action.enqueued_at = now - Duration::milliseconds(200_000);
        assert!(action.is_expired(120_000, now));
        // Retry count has no bearing on expiry.
        action.retry_count = 99;
        assert!(action.is_expired(120_000, now));
    }

    #[test]
    fn navigation_expectation_per_kind() {
        assert!(ActionKind::Search { term: "x".into() }.expects_navigation());
        assert!(ActionKind::NavigateToUrl {
            url: "https://example.com".into()
        }
        .expects_navigation());
        assert!(!ActionKind::Analyze { selectors: vec![] }.expects_navigation());
    }

    #[test]
    fn action_serde_keeps_flat_kind_fields() {
        let action = Action::from_spec(
            ActionSpec::new(ActionKind::Search {
                term: "mugs".into(),
            }),
            2,
        );
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["kind"], "search");
        assert_eq!(json["term"], "mugs");
        assert_eq!(json["retry_count"], 0);

        let back: Action = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, action.id);
        assert_eq!(back.kind, action.kind);
    }
}
