//! Session — wires the store, queue, processor, and page driver together
//! and speaks the UI wire protocol.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, warn};

use crate::action::{Action, ActionKind, ActionSpec, Feedback};
use crate::bus::{events_for_feedback, CoreEvent, UiRequest, UiResponse};
use crate::config::{BrowserConfig, FailurePolicy, PipelineConfig};
use crate::executor::DomExecutor;
use crate::page::{EokaDriver, PageDriver};
use crate::processor::{DrainOutcome, Processor};
use crate::queue::{ActionQueue, QueueStatus};
use crate::store::{MemoryStore, StateStore};
use crate::Result;

/// One pipeline instance bound to one page context.
pub struct Session {
    driver: Arc<dyn PageDriver>,
    queue: Arc<ActionQueue>,
    processor: Arc<Processor<DomExecutor>>,
    feedback_rx: Mutex<mpsc::UnboundedReceiver<Feedback>>,
    /// Action pulled by an external driver via getNextAction; completion
    /// reports for anything else are stale and ignored.
    external_current: Mutex<Option<Action>>,
    pending_events: std::sync::Mutex<Vec<CoreEvent>>,
    failure_policy: FailurePolicy,
    shutdown_tx: broadcast::Sender<()>,
}

impl Session {
    /// Launch a browser and assemble a pipeline with in-memory state.
    pub async fn launch(browser: BrowserConfig, pipeline: PipelineConfig) -> Result<Self> {
        Self::launch_with_store(browser, pipeline, Arc::new(MemoryStore::new())).await
    }

    /// Launch a browser and assemble a pipeline over the given store —
    /// pass a file store to survive process restarts.
    pub async fn launch_with_store(
        browser: BrowserConfig,
        pipeline: PipelineConfig,
        store: Arc<dyn StateStore>,
    ) -> Result<Self> {
        let driver: Arc<dyn PageDriver> = Arc::new(EokaDriver::launch(&browser).await?);
        Self::with_driver(driver, pipeline, store).await
    }

    /// Assemble a pipeline over an existing driver.
    pub async fn with_driver(
        driver: Arc<dyn PageDriver>,
        pipeline: PipelineConfig,
        store: Arc<dyn StateStore>,
    ) -> Result<Self> {
        let queue = Arc::new(ActionQueue::open(store, pipeline.default_max_retries).await?);
        let executor = DomExecutor::new(driver.clone());
        let failure_policy = pipeline.failure_policy;
        let (processor, feedback_rx) = Processor::new(queue.clone(), executor, pipeline);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            driver,
            queue,
            processor: Arc::new(processor),
            feedback_rx: Mutex::new(feedback_rx),
            external_current: Mutex::new(None),
            pending_events: std::sync::Mutex::new(Vec::new()),
            failure_policy,
            shutdown_tx,
        })
    }

    pub fn queue(&self) -> &Arc<ActionQueue> {
        &self.queue
    }

    pub fn processor(&self) -> &Arc<Processor<DomExecutor>> {
        &self.processor
    }

    /// Point the page at a URL.
    pub async fn open(&self, url: &str) -> Result<()> {
        self.driver.goto(url).await
    }

    /// Enqueue actions directly (the non-wire path).
    pub async fn enqueue(&self, specs: Vec<ActionSpec>) -> Result<usize> {
        self.processor.clear_halt();
        self.queue.enqueue(specs).await
    }

    pub async fn perform_search(&self, term: &str) -> Result<usize> {
        self.enqueue(vec![ActionSpec::new(ActionKind::Search {
            term: term.into(),
        })])
        .await
    }

    pub async fn click_first_product(&self, term: Option<&str>) -> Result<usize> {
        self.enqueue(vec![ActionSpec::new(ActionKind::FindAndClickProduct {
            term: term.unwrap_or("product").into(),
        })])
        .await
    }

    /// Queue snapshot for the UI.
    pub async fn status(&self) -> QueueStatus {
        let external = self.external_current.lock().await;
        QueueStatus {
            queue_length: self.queue.len().await,
            is_processing: self.processor.is_processing() || external.is_some(),
            current_action: self
                .processor
                .current_action()
                .or_else(|| external.as_ref().map(|a| a.id)),
        }
    }

    /// Handle one UI request with the wire-protocol semantics.
    pub async fn handle_request(&self, request: UiRequest) -> Result<UiResponse> {
        match request {
            UiRequest::AddActionsToQueue { actions } => {
                let queue_length = self.enqueue(actions).await?;
                self.push_event(CoreEvent::QueueStatusUpdate {
                    status: self.status().await,
                });
                Ok(UiResponse::Enqueued {
                    success: true,
                    queue_length,
                })
            }

            UiRequest::GetNextAction => {
                let action = self.queue.take_head().await?;
                if let Some(ref action) = action {
                    *self.external_current.lock().await = Some(action.clone());
                }
                Ok(UiResponse::NextAction {
                    success: true,
                    action,
                })
            }

            UiRequest::ActionCompleted { action_id } => {
                let mut current = self.external_current.lock().await;
                if current.as_ref().map(|a| a.id) == Some(action_id) {
                    *current = None;
                } else {
                    debug!("ignoring stale external completion for {}", action_id);
                }
                Ok(UiResponse::Ack { success: true })
            }

            UiRequest::ActionFailed { action_id, error } => {
                warn!("external driver reported failure for {}: {}", action_id, error);
                let mut current = self.external_current.lock().await;
                if current.as_ref().map(|a| a.id) == Some(action_id) {
                    *current = None;
                }
                drop(current);

                if self.failure_policy == FailurePolicy::Halt {
                    self.queue.clear().await?;
                    self.processor.halt();
                    self.push_event(CoreEvent::QueueCleared);
                }
                Ok(UiResponse::Ack { success: true })
            }

            UiRequest::ClearQueue => {
                self.queue.clear().await?;
                self.processor.clear_halt();
                self.push_event(CoreEvent::QueueCleared);
                self.push_event(CoreEvent::QueueStatusUpdate {
                    status: self.status().await,
                });
                Ok(UiResponse::Ack { success: true })
            }

            UiRequest::GetQueueStatus => Ok(UiResponse::Status(self.status().await)),

            UiRequest::PerformSearch { search_term } => {
                let queue_length = self.perform_search(&search_term).await?;
                Ok(UiResponse::Enqueued {
                    success: true,
                    queue_length,
                })
            }

            UiRequest::ClickFirstProduct { search_term } => {
                let queue_length = self.click_first_product(search_term.as_deref()).await?;
                Ok(UiResponse::Enqueued {
                    success: true,
                    queue_length,
                })
            }
        }
    }

    /// Collect UI notifications accumulated since the last poll.
    pub async fn poll_events(&self) -> Vec<CoreEvent> {
        let mut events: Vec<CoreEvent> = {
            let mut pending = self
                .pending_events
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *pending)
        };

        let mut rx = self.feedback_rx.lock().await;
        while let Ok(feedback) = rx.try_recv() {
            events.extend(events_for_feedback(&feedback));
        }
        events
    }

    /// Drain the queue to completion, re-entering after every navigation
    /// boundary the way a fresh page load would.
    pub async fn drive_to_completion(&self) -> Result<DrainOutcome> {
        let mut outcome = self.processor.drain().await?;
        loop {
            match outcome {
                DrainOutcome::AwaitNavigation | DrainOutcome::Busy => {
                    outcome = self.processor.resume_after_load().await?;
                }
                DrainOutcome::Idle | DrainOutcome::Halted => return Ok(outcome),
            }
        }
    }

    /// Start the periodic safety-net drain; stopped by [`Session::shutdown`].
    pub fn spawn_safety_net(&self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(
            self.processor
                .clone()
                .run_safety_net(self.shutdown_tx.subscribe()),
        )
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    fn push_event(&self, event: CoreEvent) {
        self.pending_events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use uuid::Uuid;

    /// Driver for a page with nothing on it: every probe comes back
    /// empty, every mutation succeeds.
    struct BlankPage;

    #[async_trait]
    impl PageDriver for BlankPage {
        async fn goto(&self, _url: &str) -> Result<()> {
            Ok(())
        }
        async fn current_url(&self) -> Result<String> {
            Ok("https://blank.example.com".into())
        }
        async fn evaluate(&self, _js: &str) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
        async fn execute(&self, _js: &str) -> Result<()> {
            Ok(())
        }
        async fn click(&self, _selector: &str) -> Result<()> {
            Ok(())
        }
        async fn press_key(&self, _key: &str) -> Result<()> {
            Ok(())
        }
        async fn wait(&self, _ms: u64) {}
    }

    async fn session() -> Session {
        let pipeline = PipelineConfig {
            retry_backoff_ms: 1,
            cooldown_ms: 1,
            settle_delay_ms: 1,
            default_max_retries: 0,
            ..PipelineConfig::default()
        };
        Session::with_driver(Arc::new(BlankPage), pipeline, Arc::new(MemoryStore::new()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn empty_queue_status() {
        let session = session().await;
        let response = session
            .handle_request(UiRequest::GetQueueStatus)
            .await
            .unwrap();
        match response {
            UiResponse::Status(status) => {
                assert_eq!(status.queue_length, 0);
                assert!(!status.is_processing);
                assert!(status.current_action.is_none());
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn add_actions_reports_queue_length() {
        let session = session().await;
        let request: UiRequest = serde_json::from_str(
            r#"{"action": "addActionsToQueue", "actions": [
                {"kind": "search", "term": "mugs"},
                {"kind": "analyze", "selectors": [".price"]}
            ]}"#,
        )
        .unwrap();

        match session.handle_request(request).await.unwrap() {
            UiResponse::Enqueued {
                success,
                queue_length,
            } => {
                assert!(success);
                assert_eq!(queue_length, 2);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn get_next_action_pulls_and_parks_the_head() {
        let session = session().await;
        session.perform_search("mugs").await.unwrap();

        let response = session
            .handle_request(UiRequest::GetNextAction)
            .await
            .unwrap();
        let action = match response {
            UiResponse::NextAction {
                action: Some(action),
                ..
            } => action,
            other => panic!("unexpected response: {:?}", other),
        };

        // The head is out of the queue but the session counts it as
        // processing until it's acknowledged.
        let status = session.status().await;
        assert_eq!(status.queue_length, 0);
        assert!(status.is_processing);
        assert_eq!(status.current_action, Some(action.id));

        session
            .handle_request(UiRequest::ActionCompleted {
                action_id: action.id,
            })
            .await
            .unwrap();
        assert!(!session.status().await.is_processing);
    }

    #[tokio::test]
    async fn stale_external_completion_is_ignored() {
        let session = session().await;
        session.perform_search("mugs").await.unwrap();
        session
            .handle_request(UiRequest::GetNextAction)
            .await
            .unwrap();

        session
            .handle_request(UiRequest::ActionCompleted {
                action_id: Uuid::new_v4(),
            })
            .await
            .unwrap();
        // Unknown id: the parked action is still in flight.
        assert!(session.status().await.is_processing);
    }

    #[tokio::test]
    async fn clear_queue_emits_event_and_is_idempotent() {
        let session = session().await;
        session.perform_search("mugs").await.unwrap();

        session.handle_request(UiRequest::ClearQueue).await.unwrap();
        session.handle_request(UiRequest::ClearQueue).await.unwrap();
        assert_eq!(session.status().await.queue_length, 0);

        let events = session.poll_events().await;
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, CoreEvent::QueueCleared))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn failed_product_click_produces_end_to_end_event() {
        let session = session().await;
        session.click_first_product(None).await.unwrap();

        // Blank page: no product will ever match; zero retries makes the
        // failure terminal on the first attempt.
        session.drive_to_completion().await.unwrap();

        let events = session.poll_events().await;
        let product_event = events
            .iter()
            .find(|e| matches!(e, CoreEvent::ProductClickResult { .. }))
            .expect("missing productClickResult");
        match product_event {
            CoreEvent::ProductClickResult {
                search_term,
                success,
                ..
            } => {
                assert_eq!(search_term, "product");
                assert!(!success);
            }
            _ => unreachable!(),
        }
    }
}
