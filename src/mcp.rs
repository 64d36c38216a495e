//! MCP JSON-RPC protocol bridge.
//!
//! Exposes the [`ToolRegistry`] as MCP tools over the Streamable HTTP
//! transport mounted at `/mcp` by [`crate::server`]. Tool results are the
//! operation's JSON, pretty-printed as a single text content block.

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler};

use crate::tools::{ToolContext, ToolRegistry};

pub const SERVER_NAME: &str = "multi-kb-rag-server";

const INSTRUCTIONS: &str = "\
Multi-Knowledge Base RAG Server - agent instructions.

WORKFLOW PATTERNS:
1. First time with a new KB:
   upload_document_to_kb (auto_create=true), then chat_with_kb
2. Add documents to an existing KB:
   upload_document_to_kb (kb_name=existing), then chat_with_kb
3. Query a KB the user named:
   chat_with_kb, reusing the same session_id for follow-up questions
4. Query without naming a KB:
   chat_global; the semantic router picks the best KB
5. Explore KBs:
   list_collections, then get_collection_info, then chat_with_kb

KEY FEATURES:
- Semantic router: chat_global finds the right KB from the question alone.
- Auto-create: upload_document_to_kb creates a missing KB; create_collection is optional.
- Auto-metadata: doc_type, category, status and title are extracted on upload.
- KB descriptions are generated from that metadata and drive routing.
- Sessions: use one session_id per user conversation to keep context.
- KBs are isolated from each other.
- File types: PDF, TXT, DOCX.

ERROR HANDLING:
- KB does not exist: upload with auto_create=true.
- No documents yet: upload at least one document before chat_with_kb.
- Unknown session: it is created on the first chat_with_kb call.
- chat_global found no KB: pick one from available_kbs and use chat_with_kb.

TIPS:
- Use descriptive kb_names ('client_abc', 'medical_research').
- Use descriptive session_ids ('user123_medical').
- Call list_collections first if unsure which KBs exist.";

/// Each MCP session receives a clone of this struct; everything is behind
/// `Arc`, so all sessions share one engine and tool set.
#[derive(Clone)]
pub struct McpBridge {
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
}

impl McpBridge {
    pub fn new(tools: Arc<ToolRegistry>, ctx: ToolContext) -> Self {
        Self { tools, ctx }
    }

    fn to_mcp_tool(tool: &dyn crate::tools::Tool) -> Tool {
        let input_schema = match tool.parameters_schema() {
            serde_json::Value::Object(map) => Arc::new(map),
            _ => Arc::new(serde_json::Map::new()),
        };
        let read_only = matches!(tool.name(), "list_collections" | "get_collection_info");

        Tool {
            name: Cow::Owned(tool.name().to_string()),
            title: None,
            description: Some(Cow::Owned(tool.description().to_string())),
            input_schema,
            output_schema: None,
            annotations: Some(ToolAnnotations::new().read_only(read_only)),
            execution: None,
            icons: None,
            meta: None,
        }
    }
}

impl ServerHandler for McpBridge {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                title: Some("Multi-KB RAG".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(INSTRUCTIONS.to_string()),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools: Vec<Tool> = self
            .tools
            .tools()
            .iter()
            .map(|t| Self::to_mcp_tool(t.as_ref()))
            .collect();
        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        self.tools.find(name).map(Self::to_mcp_tool)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        if self.tools.find(&request.name).is_none() {
            return Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("Unknown tool: {}", request.name),
                None,
            ));
        }

        let params = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

        match self.tools.call(&request.name, &params, &self.ctx).await {
            Ok(result) => {
                let text = serde_json::to_string_pretty(&result).unwrap_or_default();
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(e) => {
                tracing::warn!(tool = %request.name, error = %e, "tool call rejected");
                Ok(CallToolResult::error(vec![Content::text(e.to_string())]))
            }
        }
    }
}
