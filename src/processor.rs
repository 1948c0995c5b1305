//! Queue processor — drains the action queue one action at a time.
//!
//! The drain is a suspend-and-resume state machine rather than a blocking
//! loop: every settle, backoff, and cooldown is a timer await, and a
//! navigation boundary ends the drain entirely (the destroyed page
//! context cannot run the next cycle; the persisted queue is picked up
//! again on the next page load).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::action::{Action, ExecOutcome, Feedback, Outcome};
use crate::config::{FailurePolicy, PipelineConfig};
use crate::queue::ActionQueue;
use crate::Result;

/// Execution seam consumed by the processor. The production
/// implementation dispatches to the DOM primitives; tests script it.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &Action) -> ExecOutcome;
}

/// How a drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Queue empty.
    Idle,
    /// A navigation-expecting action succeeded; resume after the next
    /// page load.
    AwaitNavigation,
    /// The failure policy latched the queue shut.
    Halted,
    /// Another drain was already in flight; this call was a no-op.
    Busy,
}

/// Single-flight drain driver over one [`ActionQueue`].
pub struct Processor<E> {
    queue: Arc<ActionQueue>,
    executor: E,
    config: PipelineConfig,
    feedback: mpsc::UnboundedSender<Feedback>,
    busy: AtomicBool,
    halted: AtomicBool,
    current: std::sync::Mutex<Option<uuid::Uuid>>,
}

impl<E: ActionExecutor> Processor<E> {
    pub fn new(
        queue: Arc<ActionQueue>,
        executor: E,
        config: PipelineConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Feedback>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                queue,
                executor,
                config,
                feedback: tx,
                busy: AtomicBool::new(false),
                halted: AtomicBool::new(false),
                current: std::sync::Mutex::new(None),
            },
            rx,
        )
    }

    /// Whether a drain is in flight right now.
    pub fn is_processing(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Latch the queue shut (failure-halts-queue policy, or an external
    /// failure report under it).
    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    /// Release the halt latch. Called when the UI clears the queue or
    /// enqueues fresh work.
    pub fn clear_halt(&self) {
        self.halted.store(false, Ordering::SeqCst);
    }

    /// Id of the action currently executing, if any.
    pub fn current_action(&self) -> Option<uuid::Uuid> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run drain cycles until the queue is idle, a navigation is pending,
    /// or the queue halts. A drain already in flight makes this a no-op.
    pub async fn drain(&self) -> Result<DrainOutcome> {
        if self.busy.swap(true, Ordering::SeqCst) {
            debug!("drain requested while busy; skipping");
            return Ok(DrainOutcome::Busy);
        }
        let result = self.drain_inner().await;
        self.busy.store(false, Ordering::SeqCst);
        result
    }

    /// Cold-start re-entry after a page load: wait for the DOM to settle,
    /// then drain.
    pub async fn resume_after_load(&self) -> Result<DrainOutcome> {
        tokio::time::sleep(Duration::from_millis(self.config.settle_delay_ms)).await;
        self.drain().await
    }

    /// Periodic re-trigger against lost drains (a navigation that never
    /// happened, an SPA transition that kept the context alive). Respects
    /// the single-flight guard, so a busy processor makes each tick a
    /// no-op.
    pub async fn run_safety_net(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.safety_net_interval_ms));
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("safety net stopped");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.drain().await {
                        warn!("safety-net drain failed: {}", e);
                    }
                }
            }
        }
    }

    async fn drain_inner(&self) -> Result<DrainOutcome> {
        let cooldown = Duration::from_millis(self.config.cooldown_ms);
        let backoff = Duration::from_millis(self.config.retry_backoff_ms);

        loop {
            if self.is_halted() {
                return Ok(DrainOutcome::Halted);
            }

            let Some(action) = self.queue.peek_head().await else {
                return Ok(DrainOutcome::Idle);
            };

            // Expiry wins over everything, including a pending retry.
            if action.is_expired(self.config.expiry_window_ms, Utc::now()) {
                info!("action {} expired before execution", action.id);
                self.queue.remove_head().await?;
                self.emit(
                    &action,
                    Outcome::Expired,
                    format!("{} expired before it could run", action.kind.summary()),
                );
                tokio::time::sleep(cooldown).await;
                continue;
            }

            debug!("executing {} ({})", action.kind.name(), action.id);
            self.set_current(Some(action.id));
            let outcome = self.executor.execute(&action).await;
            self.set_current(None);

            // Stale-completion guard: the queue may have been cleared (or
            // replaced) while the executor ran. A result for an action
            // that is no longer the head is discarded, not recorded.
            match self.queue.peek_head().await {
                Some(head) if head.id == action.id => {}
                _ => {
                    debug!("discarding stale completion for {}", action.id);
                    continue;
                }
            }

            if outcome.success {
                self.queue.remove_head().await?;
                let message = outcome
                    .message
                    .unwrap_or_else(|| format!("{} completed", action.kind.summary()));
                info!("action {} completed", action.id);
                self.emit(&action, Outcome::Completed, message);

                if action.kind.expects_navigation() {
                    debug!("navigation expected; drain resumes on next page load");
                    return Ok(DrainOutcome::AwaitNavigation);
                }
                tokio::time::sleep(cooldown).await;
                continue;
            }

            if action.can_retry() {
                debug!(
                    "attempt failed for {} ({}); retrying after backoff",
                    action.id,
                    outcome.message.as_deref().unwrap_or("no detail")
                );
                self.queue.requeue_head_with_retry().await?;
                tokio::time::sleep(backoff).await;
                continue;
            }

            warn!("max retries exceeded for {}", action.id);
            self.queue.remove_head().await?;
            let detail = outcome
                .message
                .unwrap_or_else(|| "action execution failed".into());
            self.emit(
                &action,
                Outcome::MaxRetriesExceeded,
                format!("{}: max retries exceeded ({})", action.kind.summary(), detail),
            );

            if self.config.failure_policy == FailurePolicy::Halt {
                self.halt();
                return Ok(DrainOutcome::Halted);
            }
            tokio::time::sleep(cooldown).await;
        }
    }

    fn set_current(&self, id: Option<uuid::Uuid>) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = id;
    }

    fn emit(&self, action: &Action, outcome: Outcome, message: String) {
        // A dropped receiver just means nobody is listening.
        let _ = self.feedback.send(Feedback {
            action: action.clone(),
            outcome,
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionKind, ActionSpec};
    use crate::store::MemoryStore;
    use std::sync::atomic::AtomicUsize;

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            retry_backoff_ms: 5,
            cooldown_ms: 1,
            settle_delay_ms: 1,
            ..PipelineConfig::default()
        }
    }

    async fn queue_with(specs: Vec<ActionSpec>) -> Arc<ActionQueue> {
        let queue = ActionQueue::open(Arc::new(MemoryStore::new()), 2)
            .await
            .unwrap();
        if !specs.is_empty() {
            queue.enqueue(specs).await.unwrap();
        }
        Arc::new(queue)
    }

    /// Executor that fails a fixed number of times, then succeeds.
    struct FlakyExecutor {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ActionExecutor for FlakyExecutor {
        async fn execute(&self, _action: &Action) -> ExecOutcome {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                ExecOutcome::failed("element not found")
            } else {
                ExecOutcome {
                    success: true,
                    message: None,
                }
            }
        }
    }

    #[tokio::test]
    async fn drain_on_empty_queue_is_idle() {
        let queue = queue_with(vec![]).await;
        let (processor, _rx) = Processor::new(
            queue,
            FlakyExecutor {
                failures: 0,
                calls: AtomicUsize::new(0),
            },
            fast_config(),
        );
        assert_eq!(processor.drain().await.unwrap(), DrainOutcome::Idle);
        assert!(!processor.is_processing());
    }

    #[tokio::test]
    async fn retry_bound_is_max_retries_plus_one_attempts() {
        let queue =
            queue_with(vec![ActionSpec::new(ActionKind::Analyze { selectors: vec![] })
                .with_max_retries(2)])
            .await;
        let executor = FlakyExecutor {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        };
        let (processor, mut rx) = Processor::new(queue.clone(), executor, fast_config());

        assert_eq!(processor.drain().await.unwrap(), DrainOutcome::Idle);
        assert_eq!(processor.executor.calls.load(Ordering::SeqCst), 3);
        assert_eq!(queue.len().await, 0);

        let feedback = rx.recv().await.unwrap();
        assert_eq!(feedback.outcome, Outcome::MaxRetriesExceeded);
        assert!(feedback.message.contains("max retries exceeded"));
    }

    #[tokio::test]
    async fn eventual_success_after_transient_failures() {
        let queue =
            queue_with(vec![ActionSpec::new(ActionKind::Analyze { selectors: vec![] })
                .with_max_retries(2)])
            .await;
        let executor = FlakyExecutor {
            failures: 2,
            calls: AtomicUsize::new(0),
        };
        let (processor, mut rx) = Processor::new(queue.clone(), executor, fast_config());

        assert_eq!(processor.drain().await.unwrap(), DrainOutcome::Idle);
        assert_eq!(processor.executor.calls.load(Ordering::SeqCst), 3);

        let feedback = rx.recv().await.unwrap();
        assert_eq!(feedback.outcome, Outcome::Completed);
    }

    #[tokio::test]
    async fn navigation_expecting_success_ends_the_drain() {
        let queue = queue_with(vec![
            ActionSpec::new(ActionKind::Search { term: "a".into() }),
            ActionSpec::new(ActionKind::Search { term: "b".into() }),
        ])
        .await;
        let executor = FlakyExecutor {
            failures: 0,
            calls: AtomicUsize::new(0),
        };
        let (processor, _rx) = Processor::new(queue.clone(), executor, fast_config());

        assert_eq!(
            processor.drain().await.unwrap(),
            DrainOutcome::AwaitNavigation
        );
        // The second action waits for the next page load.
        assert_eq!(queue.len().await, 1);
        assert_eq!(processor.executor.calls.load(Ordering::SeqCst), 1);

        // Re-entry drains the remainder.
        assert_eq!(
            processor.resume_after_load().await.unwrap(),
            DrainOutcome::AwaitNavigation
        );
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn halt_policy_latches_until_cleared() {
        let queue = queue_with(vec![
            ActionSpec::new(ActionKind::Analyze { selectors: vec![] }).with_max_retries(0),
            ActionSpec::new(ActionKind::Analyze { selectors: vec![] }),
        ])
        .await;
        let executor = FlakyExecutor {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        };
        let config = PipelineConfig {
            failure_policy: FailurePolicy::Halt,
            ..fast_config()
        };
        let (processor, _rx) = Processor::new(queue.clone(), executor, config);

        assert_eq!(processor.drain().await.unwrap(), DrainOutcome::Halted);
        // The poisoned action is gone, the rest is intact.
        assert_eq!(queue.len().await, 1);
        assert_eq!(processor.drain().await.unwrap(), DrainOutcome::Halted);
        assert_eq!(processor.executor.calls.load(Ordering::SeqCst), 1);

        processor.clear_halt();
        assert_eq!(processor.drain().await.unwrap(), DrainOutcome::Idle);
    }
}
