//! Downstream MCP server.
//!
//! Aggregates tools from every configured upstream (prefixed
//! `<server>_<tool>` or collision-checked), forwards `tools/call` to the
//! owning upstream, and runs the condenser middleware over every result.
//! Serves on stdio or streamable HTTP.

use std::collections::HashMap;
use std::sync::Arc;

use rmcp::model::*;
use rmcp::service::RequestContext;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::StreamableHttpService;
use rmcp::{ErrorData as McpError, RoleServer, ServerHandler, ServiceExt};
use tracing::info;

use crate::algo::parsers::ParserRegistry;
use crate::algo::tokens::TokenCounter;
use crate::config::ProxyConfig;
use crate::error::Error;
use crate::metrics::Recorder;

use super::envelope::{ContentItem, ResultEnvelope};
use super::middleware::CondenserMiddleware;
use super::upstream::{self, UpstreamHandle};

struct Route {
    server: String,
    base_name: String,
}

struct ProxyState {
    middleware: CondenserMiddleware,
    tools: Vec<Tool>,
    routes: HashMap<String, Route>,
    upstreams: HashMap<String, UpstreamHandle>,
}

/// The proxy's downstream face. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct ProxyHandler {
    state: Arc<ProxyState>,
}

impl ProxyHandler {
    /// Connect every upstream, aggregate and register their tools, and wire
    /// up the middleware. Tool-name collisions with prefixing disabled are
    /// fatal here.
    pub async fn build(
        config: Arc<ProxyConfig>,
        registry: Arc<ParserRegistry>,
        counter: Arc<dyn TokenCounter>,
        metrics: Arc<dyn Recorder>,
    ) -> Result<Self, Error> {
        let prefix = config.multi_upstream && config.prefix_tools;

        let mut tools: Vec<Tool> = Vec::new();
        let mut routes: HashMap<String, Route> = HashMap::new();
        let mut upstreams: HashMap<String, UpstreamHandle> = HashMap::new();

        for (server_name, srv_cfg) in &config.servers {
            let handle = UpstreamHandle::for_config(srv_cfg).await?;
            let upstream_tools = handle.list_tools().await?;
            upstreams.insert(server_name.clone(), handle);

            for tool in upstream_tools {
                let base_name = tool.name.to_string();
                if config.multi_upstream {
                    if let Some(allow) = &srv_cfg.tools {
                        if !allow.contains(&base_name) {
                            continue;
                        }
                    }
                }

                let registered = if prefix {
                    format!("{server_name}_{base_name}")
                } else {
                    base_name.clone()
                };
                if let Some(existing) = routes.get(&registered) {
                    return Err(Error::BadConfig(format!(
                        "tool name collision: {registered:?} is provided by both \
                         {:?} and {server_name:?}; enable prefix_tools or use the \
                         tools allowlist to resolve",
                        existing.server
                    )));
                }

                let mut registered_tool = tool.clone();
                registered_tool.name = registered.clone().into();
                tools.push(registered_tool);
                routes.insert(
                    registered.clone(),
                    Route {
                        server: server_name.clone(),
                        base_name,
                    },
                );
                info!(tool = registered, server = server_name, "registered");
            }
        }

        let tool_server_map = config.multi_upstream.then(|| {
            routes
                .iter()
                .map(|(name, route)| (name.clone(), route.server.clone()))
                .collect::<HashMap<_, _>>()
        });

        let middleware =
            CondenserMiddleware::new(config, tool_server_map, registry, counter, metrics);

        Ok(Self {
            state: Arc::new(ProxyState {
                middleware,
                tools,
                routes,
                upstreams,
            }),
        })
    }

    fn listed_tools(&self) -> Vec<Tool> {
        let mut tools = self.state.tools.clone();
        for tool in &mut tools {
            if self.state.middleware.should_process(&tool.name) {
                tool.output_schema = None;
            }
        }
        tools
    }

    async fn forward_call(&self, request: CallToolRequestParams) -> Result<CallToolResult, McpError> {
        let registered = request.name.to_string();
        let route = self
            .state
            .routes
            .get(&registered)
            .ok_or_else(|| McpError::invalid_params(format!("unknown tool: {registered}"), None))?;
        let upstream = self
            .state
            .upstreams
            .get(&route.server)
            .ok_or_else(|| McpError::internal_error("upstream not connected", None))?;

        let mut result = upstream
            .call_tool(&route.base_name, request.arguments)
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;

        let mut envelope = envelope_from(&result);
        self.state
            .middleware
            .process_result(&registered, &mut envelope)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        apply_envelope(&mut result, envelope);

        Ok(result)
    }
}

/// Project a tool result onto the envelope the middleware owns.
fn envelope_from(result: &CallToolResult) -> ResultEnvelope {
    ResultEnvelope {
        content: result
            .content
            .iter()
            .map(|item| match &item.raw {
                RawContent::Text(t) => ContentItem::Text {
                    text: t.text.clone(),
                },
                _ => ContentItem::Other(serde_json::Value::Null),
            })
            .collect(),
        structured: result.structured_content.clone(),
    }
}

/// Write rewritten text items back, leaving every other item untouched.
fn apply_envelope(result: &mut CallToolResult, envelope: ResultEnvelope) {
    for (item, env_item) in result.content.iter_mut().zip(envelope.content) {
        if let ContentItem::Text { text } = env_item {
            if !matches!(&item.raw, RawContent::Text(t) if t.text == text) {
                *item = Content::text(text);
            }
        }
    }
    if envelope.structured.is_none() {
        result.structured_content = None;
    }
}

impl ServerHandler for ProxyHandler {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Condensing reverse proxy: tool results from the configured \
                 upstream MCP servers are rewritten into compact tabular text \
                 before they reach the client."
                    .into(),
            ),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: None }),
                ..Default::default()
            },
            server_info: Implementation {
                name: "tooltrim".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: Some("tooltrim proxy".into()),
                description: Some(
                    "MCP reverse proxy that condenses verbose tool results".into(),
                ),
                icons: None,
                website_url: None,
            },
            ..Default::default()
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult {
            tools: self.listed_tools(),
            next_cursor: None,
            meta: Default::default(),
        }))
    }

    fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        async move { self.forward_call(request).await }
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        self.listed_tools().into_iter().find(|t| t.name == name)
    }
}

/// Serve the proxy on stdio.
pub async fn serve_stdio(handler: ProxyHandler) -> Result<(), Error> {
    let service = handler
        .serve(rmcp::transport::io::stdio())
        .await
        .map_err(|e| Error::Upstream(format!("stdio serve error: {e}")))?;
    service
        .waiting()
        .await
        .map_err(|e| Error::Upstream(format!("stdio serve error: {e}")))?;
    Ok(())
}

/// Serve the proxy over streamable HTTP at `/mcp`, capturing each request's
/// headers for the forward-header maps.
pub async fn serve_http(handler: ProxyHandler, host: &str, port: u16) -> Result<(), Error> {
    let service = StreamableHttpService::new(
        move || Ok(handler.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );
    let router = axum::Router::new()
        .nest_service("/mcp", service)
        .layer(axum::middleware::from_fn(capture_headers));

    let listener = tokio::net::TcpListener::bind((host, port))
        .await
        .map_err(|e| Error::BadConfig(format!("cannot bind {host}:{port}: {e}")))?;
    info!(host, port, "proxy listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .map_err(|e| Error::Upstream(format!("serve error: {e}")))?;
    Ok(())
}

async fn capture_headers(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let headers = request.headers().clone();
    upstream::with_incoming_headers(headers, next.run(request)).await
}

/// Log the effective configuration at startup.
pub fn log_startup(config: &ProxyConfig) {
    info!(
        host = config.host,
        port = config.port,
        multi_upstream = config.multi_upstream,
        prefix_tools = config.prefix_tools,
        "starting tooltrim proxy"
    );
    for (name, srv) in &config.servers {
        let tools_desc = srv
            .tools
            .as_ref()
            .map(|t| t.join(","))
            .unwrap_or_else(|| "*".into());
        info!(
            server = name,
            url = srv.url,
            tools = tools_desc,
            condense = srv.condense,
            toon_fallback = srv.toon_fallback,
            min_token_threshold = srv.min_token_threshold,
            revert_if_larger = srv.revert_if_larger,
            max_token_limit = srv.max_token_limit,
            profile = srv.profile.as_deref().unwrap_or("default"),
            "upstream configured"
        );
    }
    if config.metrics_enabled {
        info!(port = config.metrics_port, "metrics exporter enabled");
    }
}
