//! Wire messages exchanged with the UI collaborator.
//!
//! The transport itself (iframe, MCP, whatever hosts the chat) is an
//! external collaborator; these are the shapes it exchanges with the
//! pipeline. Tags and field names are camelCase on the wire.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::{Action, ActionKind, ActionSpec, Feedback, Outcome};
use crate::queue::QueueStatus;

/// Requests from the UI to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum UiRequest {
    AddActionsToQueue {
        actions: Vec<ActionSpec>,
    },
    GetNextAction,
    ActionCompleted {
        action_id: Uuid,
    },
    ActionFailed {
        action_id: Uuid,
        error: String,
    },
    ClearQueue,
    GetQueueStatus,
    PerformSearch {
        search_term: String,
    },
    ClickFirstProduct {
        #[serde(default)]
        search_term: Option<String>,
    },
}

/// Replies to [`UiRequest`]s.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum UiResponse {
    Enqueued {
        success: bool,
        queue_length: usize,
    },
    NextAction {
        success: bool,
        action: Option<Action>,
    },
    Status(QueueStatus),
    Ack {
        success: bool,
    },
}

/// Notifications from the pipeline to the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CoreEvent {
    ActionCompleted {
        action_data: Action,
    },
    ActionFailed {
        action_data: Action,
        error: String,
    },
    QueueStatusUpdate {
        status: QueueStatus,
    },
    QueueCleared,
    ProductClickResult {
        search_term: String,
        success: bool,
        message: String,
    },
}

/// Map one terminal feedback report onto its UI notifications. Every
/// terminal outcome produces exactly one completed/failed event;
/// find-and-click actions additionally report the end-to-end
/// productClickResult.
pub fn events_for_feedback(feedback: &Feedback) -> Vec<CoreEvent> {
    let mut events = Vec::with_capacity(2);
    match feedback.outcome {
        Outcome::Completed => events.push(CoreEvent::ActionCompleted {
            action_data: feedback.action.clone(),
        }),
        _ => events.push(CoreEvent::ActionFailed {
            action_data: feedback.action.clone(),
            error: feedback.message.clone(),
        }),
    }

    if let ActionKind::FindAndClickProduct { ref term } = feedback.action.kind {
        events.push(CoreEvent::ProductClickResult {
            search_term: term.clone(),
            success: feedback.is_success(),
            message: feedback.message.clone(),
        });
    }

    events
}
