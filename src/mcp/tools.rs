/// MCP tool handlers.
///
/// 1. find_resources – subject-scoped semantic search
/// 2. build_index    – rebuild the index from the records directory
/// 3. list_subjects  – subjects accepted by find_resources
/// 4. index_status   – entry counts and embedding generation
use crate::app::App;
use crate::error::EngineError;
use crate::finder::Query;
use rmcp::handler::server::ServerHandler;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{ErrorData as McpError, handler::server::tool::ToolRouter, model::*, tool, tool_router};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

// ── Parameter structs ────────────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
struct FindParams {
    /// Subject to search within, e.g. 'Biology' (see list_subjects)
    subject: String,
    /// Topic to find resources for, e.g. 'The Cell Cycle'
    topic: String,
    /// Optional refinement appended to the topic, e.g. 'Mitosis'
    subtopic: Option<String>,
    /// Max results (default: 5, capped at 20)
    limit: Option<usize>,
}

#[derive(Deserialize, JsonSchema)]
struct BuildParams {
    /// Directory of JSON record files (default: configured records_dir)
    records_dir: Option<String>,
    /// Re-embed every record even if unchanged (default: false)
    force: Option<bool>,
}

// ── Response helpers ─────────────────────────────────────────────────

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("failed to encode response: {e}"), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

fn error_result(msg: &str) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(msg.to_string())]))
}

/// Caller mistakes become tool errors the client can correct; everything
/// else is an internal failure.
fn engine_error(e: EngineError) -> Result<CallToolResult, McpError> {
    if e.is_client_error() {
        error_result(&e.to_string())
    } else {
        warn!("Request failed: {e}");
        Err(McpError::internal_error(e.to_string(), None))
    }
}

// ── Tool implementations ─────────────────────────────────────────────

#[derive(Clone)]
pub struct ResourceTools {
    pub app: App,
    pub tool_router: ToolRouter<Self>,
}

impl ServerHandler for ResourceTools {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Finds study resources for a topic within one subject. Call list_subjects first \
                 to see valid subjects, then find_resources."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[tool_router]
impl ResourceTools {
    pub fn new(app: App) -> Self {
        Self {
            app,
            tool_router: Self::tool_router(),
        }
    }

    // ── Tool 1: find_resources ──────────────────────────────────────

    #[tool(
        description = "Find study resources for a topic, restricted to the foundations of one subject. Results are ordered by similarity score (higher is closer)."
    )]
    async fn find_resources(
        &self,
        params: Parameters<FindParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.subject.trim().is_empty() {
            return error_result("subject is required");
        }
        if p.topic.trim().is_empty() {
            return error_result("topic is required");
        }

        let query = Query {
            subject: p.subject,
            topic: p.topic,
            subtopic: p.subtopic,
            limit: p.limit,
        };

        match self.app.finder().find(&query).await {
            Ok(resources) => json_result(&serde_json::json!({ "resources": resources })),
            Err(e) => engine_error(e),
        }
    }

    // ── Tool 2: build_index ─────────────────────────────────────────

    #[tool(
        description = "Rebuild the resource index from the JSON record files. Unchanged records are skipped unless force is set; records no longer present are removed."
    )]
    async fn build_index(&self, params: Parameters<BuildParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let dir = p.records_dir.as_deref().map(Path::new);
        if let Some(missing) = dir.filter(|d| !d.is_dir()) {
            return error_result(&format!("records_dir not found: {}", missing.display()));
        }

        match self
            .app
            .rebuild_from_dir(dir, p.force.unwrap_or(false), None)
            .await
        {
            Ok(report) => json_result(&report),
            Err(e) => match e.downcast::<EngineError>() {
                Ok(engine) => engine_error(engine),
                Err(other) => error_result(&format!("{other:#}")),
            },
        }
    }

    // ── Tool 3: list_subjects ───────────────────────────────────────

    #[tool(description = "List the subjects accepted by find_resources")]
    async fn list_subjects(&self) -> Result<CallToolResult, McpError> {
        json_result(&serde_json::json!({ "subjects": self.app.finder().subjects() }))
    }

    // ── Tool 4: index_status ────────────────────────────────────────

    #[tool(
        description = "Show index health: entry count, embedding model and dimensions, last build time and entries per foundation"
    )]
    async fn index_status(&self) -> Result<CallToolResult, McpError> {
        if let Err(e) = self.app.store.ping() {
            return engine_error(e);
        }
        match self.app.finder().status() {
            Ok(status) => json_result(&status),
            Err(e) => engine_error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::CategoryMap;
    use crate::config::Config;
    use crate::db::Store;
    use crate::embedder::hashing::HashingEmbedder;
    use crate::records::sample_record;
    use std::sync::Arc;

    async fn tools() -> ResourceTools {
        let categories =
            CategoryMap::from_json(r#"{"Biology": ["Foundation 2: Cells"]}"#).unwrap();
        let app = App::new(
            Config::default(),
            categories,
            Arc::new(HashingEmbedder::new(64)),
            Store::open_in_memory().unwrap(),
        );
        app.rebuild(
            &[sample_record("Foundation 2: Cells", "The Cell Cycle", "Phases of mitosis")],
            false,
        )
        .await
        .unwrap();
        ResourceTools::new(app)
    }

    fn find(subject: &str, topic: &str) -> Parameters<FindParams> {
        Parameters(FindParams {
            subject: subject.to_string(),
            topic: topic.to_string(),
            subtopic: None,
            limit: None,
        })
    }

    #[tokio::test]
    async fn test_find_resources_success() {
        let tools = tools().await;
        let result = tools.find_resources(find("Biology", "mitosis")).await.unwrap();
        assert_ne!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn test_unknown_subject_is_tool_error() {
        let tools = tools().await;
        let result = tools.find_resources(find("Astrology", "stars")).await.unwrap();
        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn test_missing_topic_is_tool_error() {
        let tools = tools().await;
        let result = tools.find_resources(find("Biology", " ")).await.unwrap();
        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn test_build_index_missing_dir() {
        let tools = tools().await;
        let params = Parameters(BuildParams {
            records_dir: Some("/definitely/not/here".to_string()),
            force: None,
        });
        let result = tools.build_index(params).await.unwrap();
        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn test_status_and_subjects() {
        let tools = tools().await;
        assert_ne!(tools.index_status().await.unwrap().is_error, Some(true));
        assert_ne!(tools.list_subjects().await.unwrap().is_error, Some(true));
    }
}
