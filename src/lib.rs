//! # dompilot
//!
//! Best-effort DOM automation pipeline: a durable FIFO of abstract page
//! actions, a single-flight processor that drains it one action at a time
//! against an uncontrolled page, a heuristic site-aware element locator,
//! and four DOM primitives (search, click, navigate, analyze).
//!
//! The queue persists in a JSON state document, so a drain interrupted by
//! a page navigation (or a process restart) resumes from durable storage
//! instead of in-memory state.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dompilot::{BrowserConfig, PipelineConfig, Session};
//!
//! # #[tokio::main]
//! # async fn main() -> dompilot::Result<()> {
//! let session = Session::launch(BrowserConfig::default(), PipelineConfig::default()).await?;
//! session.open("https://example.com").await?;
//! session.perform_search("red t-shirt").await?;
//! session.drive_to_completion().await?;
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod bus;
pub mod config;
pub mod executor;
pub mod locator;
pub mod mcp;
pub mod page;
pub mod processor;
pub mod queue;
pub mod session;
pub mod store;

pub use action::{Action, ActionKind, ActionSpec, ActionStatus, ExecOutcome, Feedback, Outcome};
pub use bus::{CoreEvent, UiRequest, UiResponse};
pub use config::{BrowserConfig, Config, FailurePolicy, PipelineConfig};
pub use executor::DomExecutor;
pub use locator::{ElementMatch, LocatorQuery, TargetRole};
pub use page::{EokaDriver, PageDriver};
pub use processor::{ActionExecutor, DrainOutcome, Processor};
pub use queue::{ActionQueue, QueueStatus};
pub use session::Session;
pub use store::{FileStore, MemoryStore, StateDocument, StateStore};

/// Result type for dompilot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading configuration, persisting the
/// queue, or driving the page.
///
/// Per-action failures (element not found, expiry, retries exhausted) are
/// reported as [`Feedback`] outcomes by the processor, never thrown across
/// the UI boundary; the variants here exist for the executor internals and
/// for callers of the storage layer. Only [`Error::Storage`] is treated as
/// unrecoverable.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("browser error: {0}")]
    Browser(#[from] eoka::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("action failed: {0}")]
    ActionFailed(String),
}
