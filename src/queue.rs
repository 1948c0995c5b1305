//! Durable FIFO of pending actions.
//!
//! The queue is the only shared mutable resource in the pipeline. Every
//! read-modify-write cycle is serialized through one in-process mutex and
//! then persisted whole, so concurrent enqueues from the UI and the
//! processor's head mutations cannot lose updates. Cross-process writers
//! sharing a state file are out of scope.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::action::{Action, ActionSpec, ActionStatus};
use crate::store::{StateDocument, StateStore};
use crate::Result;

/// Read-only snapshot for the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub queue_length: usize,
    pub is_processing: bool,
    pub current_action: Option<Uuid>,
}

/// Ordered, persisted action queue. FIFO; only the head is ever mutated
/// in place.
pub struct ActionQueue {
    store: Arc<dyn StateStore>,
    state: Mutex<StateDocument>,
    default_max_retries: u32,
}

impl ActionQueue {
    /// Open the queue, loading whatever the store already holds. This is
    /// the re-entry point after a page navigation destroyed the previous
    /// context.
    pub async fn open(store: Arc<dyn StateStore>, default_max_retries: u32) -> Result<Self> {
        let mut state = store.load().await?;
        // An action left marked executing by a torn-down context is simply
        // pending again; the work either happened (and navigated us here)
        // or it didn't.
        for action in &mut state.action_queue {
            action.status = ActionStatus::Pending;
        }
        debug!("queue opened with {} pending actions", state.action_queue.len());
        Ok(Self {
            store,
            state: Mutex::new(state),
            default_max_retries,
        })
    }

    /// Append actions, assigning fresh ids/timestamps. Returns the new
    /// queue length.
    pub async fn enqueue(&self, specs: Vec<ActionSpec>) -> Result<usize> {
        let mut state = self.state.lock().await;
        for spec in specs {
            let action = Action::from_spec(spec, self.default_max_retries);
            debug!("enqueue {} ({})", action.kind.name(), action.id);
            state.action_queue.push(action);
        }
        self.store.persist(&state).await?;
        Ok(state.action_queue.len())
    }

    /// The next action to execute, without removing it.
    pub async fn peek_head(&self) -> Option<Action> {
        self.state.lock().await.action_queue.first().cloned()
    }

    /// Remove exactly the head (after success, terminal failure, or
    /// expiry).
    pub async fn remove_head(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.action_queue.is_empty() {
            let removed = state.action_queue.remove(0);
            debug!("removed head {} ({})", removed.kind.name(), removed.id);
            self.store.persist(&state).await?;
        }
        Ok(())
    }

    /// Bump the head's retry count in place. The action stays at the
    /// front, ahead of anything enqueued since — re-appending would let
    /// newer work jump the line.
    pub async fn requeue_head_with_retry(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(head) = state.action_queue.first_mut() {
            head.retry_count += 1;
            head.status = ActionStatus::Pending;
            debug!(
                "requeued head {} (retry {}/{})",
                head.id, head.retry_count, head.max_retries
            );
            self.store.persist(&state).await?;
        }
        Ok(())
    }

    /// Pull the head off the queue for an external driver, marking it
    /// executing. The caller owns reporting the outcome back.
    pub async fn take_head(&self) -> Result<Option<Action>> {
        let mut state = self.state.lock().await;
        if state.action_queue.is_empty() {
            return Ok(None);
        }
        let mut action = state.action_queue.remove(0);
        action.status = ActionStatus::Executing;
        self.store.persist(&state).await?;
        Ok(Some(action))
    }

    /// Empty the queue unconditionally. Idempotent.
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.action_queue.clear();
        self.store.persist(&state).await?;
        debug!("queue cleared");
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.action_queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of all pending actions in queue order.
    pub async fn pending(&self) -> Vec<Action> {
        self.state.lock().await.action_queue.clone()
    }

    /// Ids in queue order, oldest first.
    pub async fn ids(&self) -> Vec<Uuid> {
        self.state
            .lock()
            .await
            .action_queue
            .iter()
            .map(|a| a.id)
            .collect()
    }

    // Non-queue document keys, persisted alongside the queue.

    pub async fn frame_visible(&self) -> bool {
        self.state.lock().await.frame_visible
    }

    pub async fn set_frame_visible(&self, visible: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        state.frame_visible = visible;
        self.store.persist(&state).await
    }

    pub async fn record_ai_session(&self, blob: serde_json::Value) -> Result<()> {
        let mut state = self.state.lock().await;
        state.last_ai_session = Some(blob);
        self.store.persist(&state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;
    use crate::store::MemoryStore;

    fn spec(term: &str) -> ActionSpec {
        ActionSpec::new(ActionKind::Search { term: term.into() })
    }

    async fn open_queue() -> ActionQueue {
        ActionQueue::open(Arc::new(MemoryStore::new()), 2)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn enqueue_preserves_arrival_order() {
        let queue = open_queue().await;
        queue.enqueue(vec![spec("a")]).await.unwrap();
        queue.enqueue(vec![spec("b"), spec("c")]).await.unwrap();

        let ids = queue.ids().await;
        assert_eq!(ids.len(), 3);

        let head = queue.peek_head().await.unwrap();
        assert_eq!(head.id, ids[0]);
        assert!(matches!(head.kind, ActionKind::Search { ref term } if term == "a"));

        queue.remove_head().await.unwrap();
        assert_eq!(queue.peek_head().await.unwrap().id, ids[1]);
    }

    #[tokio::test]
    async fn requeue_keeps_head_in_front_of_newer_work() {
        let queue = open_queue().await;
        queue.enqueue(vec![spec("first")]).await.unwrap();
        let head_id = queue.peek_head().await.unwrap().id;

        queue.enqueue(vec![spec("second")]).await.unwrap();
        queue.requeue_head_with_retry().await.unwrap();

        let head = queue.peek_head().await.unwrap();
        assert_eq!(head.id, head_id);
        assert_eq!(head.retry_count, 1);
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let queue = open_queue().await;
        queue.enqueue(vec![spec("a"), spec("b")]).await.unwrap();

        queue.clear().await.unwrap();
        assert_eq!(queue.len().await, 0);
        queue.clear().await.unwrap();
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn remove_head_on_empty_queue_is_a_no_op() {
        let queue = open_queue().await;
        queue.remove_head().await.unwrap();
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn take_head_marks_executing_and_removes() {
        let queue = open_queue().await;
        queue.enqueue(vec![spec("a")]).await.unwrap();

        let taken = queue.take_head().await.unwrap().unwrap();
        assert_eq!(taken.status, ActionStatus::Executing);
        assert!(queue.is_empty().await);
        assert!(queue.take_head().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn queue_survives_reopen_from_same_store() {
        let store = Arc::new(MemoryStore::new());
        {
            let queue = ActionQueue::open(store.clone(), 2).await.unwrap();
            queue.enqueue(vec![spec("persisted")]).await.unwrap();
        }

        let reopened = ActionQueue::open(store, 2).await.unwrap();
        assert_eq!(reopened.len().await, 1);
        let head = reopened.peek_head().await.unwrap();
        assert!(matches!(head.kind, ActionKind::Search { ref term } if term == "persisted"));
        assert_eq!(head.status, ActionStatus::Pending);
    }

    #[tokio::test]
    async fn frame_visibility_persists_beside_queue() {
        let store = Arc::new(MemoryStore::new());
        let queue = ActionQueue::open(store.clone(), 2).await.unwrap();

        queue.set_frame_visible(true).await.unwrap();
        queue.enqueue(vec![spec("a")]).await.unwrap();
        queue.clear().await.unwrap();

        let reopened = ActionQueue::open(store, 2).await.unwrap();
        assert!(reopened.frame_visible().await);
    }
}
