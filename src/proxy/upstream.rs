//! Upstream MCP clients.
//!
//! Each upstream is reached over streamable HTTP. Static headers from config
//! are always applied; when a forward-header map is configured, the named
//! incoming request headers are translated onto the connection first, and the
//! static overlay wins on collision.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::model::{CallToolRequestParams, CallToolResult, Tool};
use rmcp::service::RunningService;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::{RoleClient, ServiceExt};
use serde_json::Value;

use crate::config::ServerConfig;
use crate::error::Error;

tokio::task_local! {
    /// Headers of the downstream request currently being served.
    static INCOMING_HEADERS: HeaderMap;
}

/// Run `fut` with the given downstream request headers visible to
/// `incoming_headers`.
pub async fn with_incoming_headers<F>(headers: HeaderMap, fut: F) -> F::Output
where
    F: std::future::Future,
{
    INCOMING_HEADERS.scope(headers, fut).await
}

/// Headers of the downstream request being served, if any. Empty outside a
/// request scope (e.g. stdio serving or startup).
pub fn incoming_headers() -> HeaderMap {
    INCOMING_HEADERS
        .try_with(|h| h.clone())
        .unwrap_or_default()
}

/// Build the upstream header set: forwarded headers renamed per the map,
/// then the static overlay, which wins on collision.
pub fn merge_headers(
    incoming: &HeaderMap,
    forward: &std::collections::BTreeMap<String, String>,
    statics: &std::collections::BTreeMap<String, String>,
) -> Result<HeaderMap, Error> {
    let mut out = HeaderMap::new();
    for (src, dst) in forward {
        if let Some(val) = incoming.get(src.to_lowercase().as_str()) {
            let name = HeaderName::from_bytes(dst.to_lowercase().as_bytes())
                .map_err(|e| Error::BadConfig(format!("invalid forward header name {dst:?}: {e}")))?;
            out.insert(name, val.clone());
        }
    }
    for (name, value) in statics {
        let name = HeaderName::from_bytes(name.to_lowercase().as_bytes())
            .map_err(|e| Error::BadConfig(format!("invalid header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::BadConfig(format!("invalid header value for {name:?}: {e}")))?;
        out.insert(name, value);
    }
    Ok(out)
}

/// A connected upstream client.
pub struct Upstream {
    service: RunningService<RoleClient, ()>,
    timeout: Option<Duration>,
}

impl Upstream {
    /// Connect to an upstream with the headers derived from its config and
    /// the current downstream request.
    pub async fn connect(cfg: &ServerConfig, incoming: &HeaderMap) -> Result<Self, Error> {
        let headers = merge_headers(incoming, &cfg.forward_headers, &cfg.headers)?;

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(secs) = cfg.request_timeout_secs {
            builder = builder.read_timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| Error::Upstream(format!("cannot build HTTP client: {e}")))?;

        let transport = StreamableHttpClientTransport::with_client(
            client,
            StreamableHttpClientTransportConfig::with_uri(cfg.url.clone()),
        );
        let service = ()
            .serve(transport)
            .await
            .map_err(|e| Error::Upstream(format!("cannot connect to {}: {e}", cfg.url)))?;

        Ok(Self {
            service,
            timeout: cfg.request_timeout_secs.map(Duration::from_secs),
        })
    }

    /// List the upstream's tools (first page).
    pub async fn list_tools(&self) -> Result<Vec<Tool>, Error> {
        let result = self
            .service
            .list_tools(Default::default())
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?;
        Ok(result.tools)
    }

    /// Forward one tool call, honoring the configured read timeout.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Map<String, Value>>,
    ) -> Result<CallToolResult, Error> {
        let params = CallToolRequestParams {
            meta: None,
            name: name.to_string().into(),
            arguments,
            task: None,
        };
        let call = self.service.call_tool(params);
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| Error::Upstream(format!("call to {name} timed out")))?,
            None => call.await,
        };
        result.map_err(|e| Error::Upstream(e.to_string()))
    }

    /// Close the underlying session.
    pub async fn shutdown(self) {
        let _ = self.service.cancel().await;
    }
}

/// Shared, reusable upstream handle. Upstreams without forward headers are
/// connected once at startup and multiplexed; with forward headers a fresh
/// connection per call carries the request's own header values.
pub enum UpstreamHandle {
    Shared(Arc<Upstream>),
    PerRequest(ServerConfig),
}

impl UpstreamHandle {
    pub async fn for_config(cfg: &ServerConfig) -> Result<Self, Error> {
        if cfg.forward_headers.is_empty() {
            let upstream = Upstream::connect(cfg, &HeaderMap::new()).await?;
            Ok(Self::Shared(Arc::new(upstream)))
        } else {
            Ok(Self::PerRequest(cfg.clone()))
        }
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Map<String, Value>>,
    ) -> Result<CallToolResult, Error> {
        match self {
            Self::Shared(upstream) => upstream.call_tool(name, arguments).await,
            Self::PerRequest(cfg) => {
                let upstream = Upstream::connect(cfg, &incoming_headers()).await?;
                let result = upstream.call_tool(name, arguments).await;
                upstream.shutdown().await;
                result
            }
        }
    }

    pub async fn list_tools(&self) -> Result<Vec<Tool>, Error> {
        match self {
            Self::Shared(upstream) => upstream.list_tools().await,
            Self::PerRequest(cfg) => {
                let upstream = Upstream::connect(cfg, &incoming_headers()).await?;
                let result = upstream.list_tools().await;
                upstream.shutdown().await;
                result
            }
        }
    }
}
