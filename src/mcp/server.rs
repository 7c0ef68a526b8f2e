/// MCP Server setup using `rmcp` with stdio transport.
use crate::app::App;
use crate::mcp::tools::ResourceTools;
use anyhow::{Context, Result};
use rmcp::{ServiceExt, handler::server::router::Router, transport::io::stdio};
use tracing::info;

/// MCP Server wrapping the application state and serving via stdio.
#[derive(Clone)]
pub struct McpServer {
    pub app: App,
}

impl McpServer {
    pub fn new(app: App) -> Self {
        Self { app }
    }

    /// Start the MCP server on stdio transport (blocks until the client disconnects).
    pub async fn start(self) -> Result<()> {
        info!("Starting MCP server on stdio...");
        let (stdin, stdout) = stdio();

        let tools = ResourceTools::new(self.app.clone());
        let router = Router::new(tools.clone()).with_tools(tools.tool_router.clone());

        let service = router
            .serve((stdin, stdout))
            .await
            .context("MCP server failed to start on stdio")?;
        service
            .waiting()
            .await
            .context("MCP server encountered an error during stdio transport")?;

        info!("MCP client disconnected");
        Ok(())
    }
}
