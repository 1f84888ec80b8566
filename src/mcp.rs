//! MCP server exposing code-context retrieval to completion clients.
//!
//! Two tools are offered over stdio: `get_code_context` returns the most
//! similar stored chunks for a snippet, and `augment_prompt` wraps the snippet
//! and those chunks into a ready-to-send completion prompt.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::info;
use rust_mcp_sdk::{
    mcp_server::{server_runtime, McpServerOptions, ServerHandler},
    schema::{
        CallToolRequestParams, CallToolResult, Implementation, InitializeResult,
        ListToolsResult, PaginatedRequestParams, RpcError, ServerCapabilities,
        ServerCapabilitiesTools, TextContent, Tool as McpTool, ToolInputSchema,
        LATEST_PROTOCOL_VERSION,
    },
    McpServer, StdioTransport, ToMcpServerHandler, TransportOptions,
};
use serde_json::{json, Map, Value};

use crate::constants::constants;
use crate::retrieval::{construct_augmented_prompt, format_context, Retriever};

pub const GET_CODE_CONTEXT: &str = "get_code_context";
pub const AUGMENT_PROMPT: &str = "augment_prompt";

/// Text result of a tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutput {
    fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

struct ToolSpec {
    name: &'static str,
    description: &'static str,
    snippet_description: &'static str,
}

const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: GET_CODE_CONTEXT,
        description: "Retrieves relevant code context from the codebase based on a code snippet. \
                      Uses semantic search to find similar code chunks that can help with code completion.",
        snippet_description: "The code snippet to find context for",
    },
    ToolSpec {
        name: AUGMENT_PROMPT,
        description: "Augments a code completion prompt with relevant context from the codebase. \
                      Returns a complete prompt that can be used with an LLM.",
        snippet_description: "The code snippet to augment with context",
    },
];

fn input_schema(spec: &ToolSpec) -> Value {
    json!({
        "type": "object",
        "properties": {
            "code_snippet": {
                "type": "string",
                "description": spec.snippet_description
            }
        },
        "required": ["code_snippet"]
    })
}

/// Tool dispatch, independent of the MCP transport.
pub struct ContextTools {
    retriever: Arc<Retriever>,
}

impl ContextTools {
    pub fn new(retriever: Arc<Retriever>) -> Self {
        Self { retriever }
    }

    pub async fn call(&self, name: &str, arguments: Option<&Map<String, Value>>) -> ToolOutput {
        let Some(arguments) = arguments else {
            return ToolOutput::error("Missing arguments");
        };
        let snippet = match arguments.get("code_snippet").and_then(Value::as_str) {
            Some(snippet) if !snippet.is_empty() => snippet,
            _ => return ToolOutput::error("Missing required argument: code_snippet"),
        };

        match name {
            GET_CODE_CONTEXT => match self.retriever.retrieve_context(snippet).await {
                Ok(chunks) => ToolOutput::ok(format_context(&chunks)),
                Err(e) => ToolOutput::ok(format!("Error retrieving context: {:#}", e)),
            },
            AUGMENT_PROMPT => match self.retriever.retrieve_context(snippet).await {
                Ok(chunks) => ToolOutput::ok(construct_augmented_prompt(snippet, &chunks)),
                Err(e) => ToolOutput::ok(format!("Error augmenting prompt: {:#}", e)),
            },
            other => ToolOutput::error(format!("Unknown tool: {}", other)),
        }
    }
}

/// Bridges [`ContextTools`] to the MCP protocol.
pub struct ContextServerHandler {
    tools: ContextTools,
}

#[async_trait]
impl ServerHandler for ContextServerHandler {
    async fn handle_list_tools_request(
        &self,
        _params: Option<PaginatedRequestParams>,
        _runtime: Arc<dyn McpServer>,
    ) -> std::result::Result<ListToolsResult, RpcError> {
        let tools = TOOLS
            .iter()
            .map(|spec| {
                let input_schema: ToolInputSchema =
                    serde_json::from_value(input_schema(spec))
                        .unwrap_or_else(|_| ToolInputSchema::new(vec![], None, None));
                McpTool {
                    name: spec.name.to_string(),
                    description: Some(spec.description.to_string()),
                    input_schema,
                    annotations: None,
                    execution: None,
                    icons: vec![],
                    meta: None,
                    output_schema: None,
                    title: None,
                }
            })
            .collect();

        Ok(ListToolsResult {
            tools,
            meta: None,
            next_cursor: None,
        })
    }

    async fn handle_call_tool_request(
        &self,
        params: CallToolRequestParams,
        _runtime: Arc<dyn McpServer>,
    ) -> std::result::Result<CallToolResult, rust_mcp_sdk::schema::schema_utils::CallToolError>
    {
        let output = self
            .tools
            .call(&params.name, params.arguments.as_ref())
            .await;
        Ok(CallToolResult {
            content: vec![TextContent::new(output.text, None, None).into()],
            is_error: output.is_error.then_some(true),
            meta: None,
            structured_content: None,
        })
    }
}

/// Run the MCP server on stdio until the client disconnects.
pub async fn run_mcp_server(tools: ContextTools) -> Result<()> {
    info!("Starting MCP server: {}", constants::MCP_SERVER_NAME);

    let server_details = InitializeResult {
        server_info: Implementation {
            name: constants::MCP_SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("Peyote Code Context".to_string()),
            description: Some("Semantic code-context retrieval for completion".to_string()),
            icons: vec![],
            website_url: None,
        },
        capabilities: ServerCapabilities {
            tools: Some(ServerCapabilitiesTools { list_changed: None }),
            ..Default::default()
        },
        meta: None,
        instructions: None,
        protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
    };

    let transport = StdioTransport::new(TransportOptions::default())
        .map_err(|e| anyhow!("Failed to create stdio transport: {}", e))?;

    let handler = ContextServerHandler { tools }.to_mcp_server_handler();

    let server = server_runtime::create_server(McpServerOptions {
        server_details,
        transport,
        handler,
        task_store: None,
        client_task_store: None,
    });

    server
        .start()
        .await
        .map_err(|e| anyhow!("MCP server failed: {}", e))?;
    Ok(())
}
