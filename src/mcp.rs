//! MCP tool surface — exposes the pipeline's queue operations to an
//! external chat/agent collaborator over stdio.

use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router, ServerHandler,
};
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::action::ActionSpec;
use crate::bus::{UiRequest, UiResponse};
use crate::config::{BrowserConfig, PipelineConfig};
use crate::session::Session;
use crate::store::{FileStore, MemoryStore, StateStore};

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct OpenRequest {
    #[schemars(description = "URL to open. Launches the browser on first call.")]
    pub url: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct EnqueueRequest {
    #[schemars(description = "Actions to queue, each tagged with a \"kind\"")]
    pub actions: Vec<ActionSpec>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SearchRequest {
    #[schemars(description = "Search term to submit on the current page")]
    pub search_term: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ClickProductRequest {
    #[schemars(description = "Search term the product should relate to (optional)")]
    #[serde(default)]
    pub search_term: Option<String>,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

fn err(e: impl std::fmt::Display) -> ErrorData {
    ErrorData::internal_error(e.to_string(), None::<Value>)
}

fn text_ok(s: impl Into<String>) -> Result<CallToolResult, ErrorData> {
    Ok(CallToolResult::success(vec![Content::text(s.into())]))
}

#[derive(Clone)]
pub struct PilotServer {
    session: Arc<Mutex<Option<Arc<Session>>>>,
    browser: BrowserConfig,
    pipeline: PipelineConfig,
    state_path: Option<PathBuf>,
    tool_router: ToolRouter<Self>,
}

impl PilotServer {
    async fn ensure_session(&self) -> Result<Arc<Session>, ErrorData> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            let store: Arc<dyn StateStore> = match self.state_path {
                Some(ref path) => Arc::new(FileStore::new(path.clone())),
                None => Arc::new(MemoryStore::new()),
            };
            let session =
                Session::launch_with_store(self.browser.clone(), self.pipeline.clone(), store)
                    .await
                    .map_err(err)?;
            *guard = Some(Arc::new(session));
        }
        Ok(guard.as_ref().unwrap().clone())
    }
}

#[tool_router]
impl PilotServer {
    pub fn new(
        browser: BrowserConfig,
        pipeline: PipelineConfig,
        state_path: Option<PathBuf>,
    ) -> Self {
        Self {
            session: Arc::new(Mutex::new(None)),
            browser,
            pipeline,
            state_path,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Open a URL. Launches the browser on first call.")]
    async fn open(&self, req: Parameters<OpenRequest>) -> Result<CallToolResult, ErrorData> {
        let session = self.ensure_session().await?;
        session.open(&req.0.url).await.map_err(err)?;
        text_ok(format!("Opened {}", req.0.url))
    }

    #[tool(
        description = "Queue actions for execution. Kinds: search, find_and_click_product, navigate_to_url, click, navigate, analyze."
    )]
    async fn enqueue_actions(
        &self,
        req: Parameters<EnqueueRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let session = self.ensure_session().await?;
        let count = req.0.actions.len();
        let response = session
            .handle_request(UiRequest::AddActionsToQueue {
                actions: req.0.actions,
            })
            .await
            .map_err(err)?;
        match response {
            UiResponse::Enqueued { queue_length, .. } => text_ok(format!(
                "Queued {} actions ({} pending)",
                count, queue_length
            )),
            other => Err(err(format!("unexpected response: {:?}", other))),
        }
    }

    #[tool(description = "Queue a search on the current page's search box.")]
    async fn perform_search(
        &self,
        req: Parameters<SearchRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let session = self.ensure_session().await?;
        let length = session
            .perform_search(&req.0.search_term)
            .await
            .map_err(err)?;
        text_ok(format!(
            "Queued search for \"{}\" ({} pending)",
            req.0.search_term, length
        ))
    }

    #[tool(description = "Queue a find-and-click on the first organic product result.")]
    async fn click_first_product(
        &self,
        req: Parameters<ClickProductRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let session = self.ensure_session().await?;
        let length = session
            .click_first_product(req.0.search_term.as_deref())
            .await
            .map_err(err)?;
        text_ok(format!("Queued product click ({} pending)", length))
    }

    #[tool(description = "Drain the queue to completion and report per-action outcomes.")]
    async fn process_queue(&self) -> Result<CallToolResult, ErrorData> {
        let session = self.ensure_session().await?;
        let outcome = session.drive_to_completion().await.map_err(err)?;

        let mut lines: Vec<String> = session
            .poll_events()
            .await
            .iter()
            .filter_map(|e| serde_json::to_string(e).ok())
            .collect();
        lines.push(format!("drain outcome: {:?}", outcome));
        text_ok(lines.join("\n"))
    }

    #[tool(description = "Queue length, processing flag, and current action id.")]
    async fn queue_status(&self) -> Result<CallToolResult, ErrorData> {
        let session = self.ensure_session().await?;
        let status = session.status().await;
        text_ok(serde_json::to_string_pretty(&status).map_err(err)?)
    }

    #[tool(description = "Empty the queue unconditionally.")]
    async fn clear_queue(&self) -> Result<CallToolResult, ErrorData> {
        let session = self.ensure_session().await?;
        session
            .handle_request(UiRequest::ClearQueue)
            .await
            .map_err(err)?;
        text_ok("Queue cleared")
    }
}

#[tool_handler]
impl ServerHandler for PilotServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "DOM automation pipeline. Open a page, queue actions \
                 (search / find_and_click_product / navigate_to_url / click / navigate / analyze), \
                 then process_queue to drain them one at a time with retry and expiry handling."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// Serve the pipeline over stdio until the client disconnects.
pub async fn serve_stdio(server: PilotServer) -> anyhow::Result<()> {
    use rmcp::{transport::stdio, ServiceExt};
    tracing::info!("serving MCP on stdio");
    let service = server.serve(stdio()).await?;
    service.waiting().await?;
    Ok(())
}
