//! The MCP listener: a `ServerHandler` that routes `tools/call` and
//! `tools/list` through the pipeline and passes every other method
//! straight through to the upstream session, unauthenticated and
//! unaudited (see DESIGN.md for the resources/prompts open question).
//!
//! Both routed methods authenticate off the same `_meta` carrier:
//! rmcp exposes it on every request's [`RequestContext`], regardless of
//! whether that request has an arguments object to stuff it into, so
//! `tools/list` authenticates exactly like `tools/call` rather than
//! running unauthenticated.

use std::sync::Arc;

use rmcp::model::{
    CallToolRequestParam, CallToolResult, ErrorCode, ErrorData as McpError, GetPromptRequestParam,
    GetPromptResult, Implementation, InitializeRequestParam, InitializeResult,
    ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult, ListToolsResult,
    PaginatedRequestParam, ProtocolVersion, ReadResourceRequestParam, ReadResourceResult,
    ServerCapabilities, ServerInfo,
};
use rmcp::service::RequestContext;
use rmcp::{RoleServer, ServerHandler};
use serde_json::{json, Map, Value};

use bansho_common::Policy;

use crate::error::ProxyError;
use crate::pipeline::{handle_tools_call, handle_tools_list};
use crate::state::AppState;
use crate::upstream::UpstreamConnector;

/// Reserved key under which an agent client mirrors transport headers
/// and query parameters — `{headers, query, query_params}` — as a
/// fallback for clients that cannot set the request's native `_meta`
/// carrier. Stripped from every tool call's arguments before they are
/// forwarded upstream or recorded in an audit row, and merged with the
/// `_meta` rmcp surfaces on [`RequestContext`] (see
/// [`context_meta_value`]), which is always consulted first.
const META_ARGUMENT_KEY: &str = "_meta";

/// Shared handle to everything a single inbound MCP session needs.
/// Cheap to clone: every field is itself an `Arc` or already `Clone`.
#[derive(Clone)]
pub struct BanshoRelay {
    state: AppState,
    policy: Arc<Policy>,
    upstream: Arc<UpstreamConnector>,
}

impl BanshoRelay {
    #[must_use]
    pub fn new(state: AppState, policy: Arc<Policy>, upstream: Arc<UpstreamConnector>) -> Self {
        Self {
            state,
            policy,
            upstream,
        }
    }
}

impl ServerHandler for BanshoRelay {
    fn get_info(&self) -> ServerInfo {
        if let Some(peer_info) = self.upstream.peer_info() {
            return ServerInfo {
                protocol_version: peer_info.protocol_version,
                capabilities: peer_info.capabilities,
                server_info: peer_info.server_info,
                instructions: peer_info.instructions,
            };
        }
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some("bansho MCP security proxy".to_string()),
        }
    }

    async fn initialize(
        &self,
        _request: InitializeRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<InitializeResult, McpError> {
        Ok(self.get_info())
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        // `tools/list` has no arguments object to mirror a `_meta`
        // carrier into, but rmcp still hands every request its `_meta`
        // via `RequestContext`, so the credential travels the same way
        // `call_tool`'s does.
        let meta = context_meta_value(&context);
        let result = handle_tools_list(&self.state, &self.upstream, &self.policy, meta.as_ref())
            .await
            .map_err(proxy_error_to_mcp)?;
        Ok(result)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let tool_name = request.name.to_string();
        let (argument_meta, arguments) = split_meta(request.arguments);
        let meta = merge_meta_values(context_meta_value(&context), argument_meta);

        let result = handle_tools_call(
            &self.state,
            &self.upstream,
            &self.policy,
            meta.as_ref(),
            &tool_name,
            arguments,
        )
        .await
        .map_err(proxy_error_to_mcp)?;

        Ok(result)
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        let resources = self
            .upstream
            .list_resources()
            .await
            .map_err(|e| upstream_error_to_mcp(&e))?;
        Ok(ListResourcesResult {
            resources,
            next_cursor: None,
        })
    }

    async fn list_resource_templates(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourceTemplatesResult, McpError> {
        Ok(ListResourceTemplatesResult {
            resource_templates: Vec::new(),
            next_cursor: None,
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        self.upstream
            .read_resource(&request.uri)
            .await
            .map_err(|e| upstream_error_to_mcp(&e))
    }

    async fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, McpError> {
        let prompts = self
            .upstream
            .list_prompts()
            .await
            .map_err(|e| upstream_error_to_mcp(&e))?;
        Ok(ListPromptsResult {
            prompts,
            next_cursor: None,
        })
    }

    async fn get_prompt(
        &self,
        request: GetPromptRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<GetPromptResult, McpError> {
        self.upstream
            .get_prompt(&request.name, request.arguments)
            .await
            .map_err(|e| upstream_error_to_mcp(&e))
    }
}

/// Split a `_meta` carrier (if present) out of a tool call's
/// arguments, so it is neither forwarded upstream nor recorded in the
/// audit row.
fn split_meta(arguments: Option<Map<String, Value>>) -> (Option<Value>, Option<Map<String, Value>>) {
    let Some(mut arguments) = arguments else {
        return (None, None);
    };
    let meta = arguments.remove(META_ARGUMENT_KEY);
    (meta, Some(arguments))
}

/// Read the request's native `_meta` off rmcp's [`RequestContext`] as a
/// plain JSON value, the way `authn::authenticate_request` expects it.
fn context_meta_value(context: &RequestContext<RoleServer>) -> Option<Value> {
    serde_json::to_value(&context.meta).ok()
}

/// Merge two `_meta` carriers, `overlay` taking precedence key-by-key
/// within each of `headers`/`query`/`query_params`. `overlay` is the
/// `arguments._meta` fallback (see [`META_ARGUMENT_KEY`]); `base` is
/// what rmcp surfaced natively on the request's [`RequestContext`].
fn merge_meta_values(base: Option<Value>, overlay: Option<Value>) -> Option<Value> {
    match (base, overlay) {
        (None, None) => None,
        (Some(value), None) | (None, Some(value)) => Some(value),
        (Some(Value::Object(mut base)), Some(Value::Object(overlay))) => {
            for (key, overlay_value) in overlay {
                match (base.get_mut(&key), overlay_value) {
                    (Some(Value::Object(base_sub)), Value::Object(overlay_sub)) => {
                        base_sub.extend(overlay_sub);
                    }
                    (_, overlay_value) => {
                        base.insert(key, overlay_value);
                    }
                }
            }
            Some(Value::Object(base))
        }
        (Some(_), Some(overlay)) => Some(overlay),
    }
}

/// Map a pipeline-internal [`ProxyError`] to the wire-level MCP error.
/// MCP's JSON-RPC error codes are a different namespace than the
/// HTTP-semantic codes this system stores and reports (401/403/429/
/// 500/502): the precise code and fixed client-visible message always
/// travel in `data`, and the nearest standard JSON-RPC code is used on
/// the envelope itself.
fn proxy_error_to_mcp(error: ProxyError) -> McpError {
    let code = match error.code {
        401 | 403 => ErrorCode::INVALID_REQUEST,
        429 => ErrorCode::INVALID_REQUEST,
        _ => ErrorCode::INTERNAL_ERROR,
    };
    McpError::new(
        code,
        error.message.to_string(),
        Some(json!({"status_code": error.code})),
    )
}

fn upstream_error_to_mcp(error: &anyhow::Error) -> McpError {
    tracing::error!(error = %error, "upstream request failed");
    McpError::new(
        ErrorCode::INTERNAL_ERROR,
        crate::error::UPSTREAM_FAILURE_MESSAGE.to_string(),
        None,
    )
}
