//! MCP JSON-RPC bridge over stdio.
//!
//! Adapts the tool registry in [`crate::tools`] to the MCP protocol via
//! `rmcp`. Stdout carries protocol frames only; all diagnostics go through
//! `tracing` (stderr or the log file). Tool failures are returned as
//! structured tool errors, never protocol errors, so the agent can read the
//! kind and message and correct its call.

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler, ServiceExt};

use crate::tools::{run_tool, tool_descriptors, ToolContext};

/// The MCP server: shared tool context behind `Arc`, cloned per session.
#[derive(Clone)]
pub struct IndexMcpServer {
    ctx: Arc<ToolContext>,
}

impl IndexMcpServer {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    fn to_mcp_tool(descriptor: &crate::tools::ToolDescriptor) -> Tool {
        let input_schema: Arc<serde_json::Map<String, serde_json::Value>> =
            match &descriptor.schema {
                serde_json::Value::Object(map) => Arc::new(map.clone()),
                _ => Arc::new(serde_json::Map::new()),
            };

        Tool {
            name: Cow::Borrowed(descriptor.name),
            title: None,
            description: Some(Cow::Borrowed(descriptor.description)),
            input_schema,
            output_schema: None,
            annotations: Some(ToolAnnotations::new().read_only(descriptor.name != "ingest_codebase")),
            execution: None,
            icons: None,
            meta: None,
        }
    }
}

impl ServerHandler for IndexMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                title: Some("Index MCP".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Local code-indexing service. Run ingest_codebase once per workspace \
                 (and after changes), then use semantic_search, context_bundle, and \
                 graph_neighbors for compact, cited lookups instead of reading files \
                 directly. index_status reports freshness against git HEAD."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools: Vec<Tool> = tool_descriptors().iter().map(Self::to_mcp_tool).collect();
        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        tool_descriptors()
            .iter()
            .find(|d| d.name == name)
            .map(Self::to_mcp_tool)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let known = tool_descriptors().iter().any(|d| d.name == request.name);
        if !known {
            return Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("no tool registered with name: {}", request.name),
                None,
            ));
        }

        let args = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));

        match run_tool(&request.name, args, &self.ctx).await {
            Ok(output) => {
                let body = serde_json::json!({
                    "summary": output.summary,
                    "result": output.payload,
                });
                let text = serde_json::to_string_pretty(&body).unwrap_or_default();
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(err) => {
                tracing::warn!(tool = %request.name, kind = err.kind(), error = %err, "tool failed");
                Ok(CallToolResult::error(vec![Content::text(format!(
                    "{} failed: {}: {}",
                    request.name,
                    err.kind(),
                    err
                ))]))
            }
        }
    }
}

/// Serve MCP over stdio until the client disconnects.
pub async fn serve_stdio(ctx: ToolContext) -> anyhow::Result<()> {
    let server = IndexMcpServer::new(ctx);
    let running = server.serve(rmcp::transport::stdio()).await?;
    running.waiting().await?;
    Ok(())
}
