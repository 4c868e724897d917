//! Result-interception middleware.
//!
//! For every tool call the middleware resolves the owning upstream, runs the
//! governor over each text item, clears the structured echo when anything was
//! rewritten, and applies token-limit truncation last. Tool listings lose
//! their `output_schema` for tools that will be rewritten, since the
//! published schema no longer matches the condensed payload.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::algo::parsers::ParserRegistry;
use crate::algo::tokens::{truncate_to_token_limit, TokenCounter};
use crate::config::{ProxyConfig, ServerConfig};
use crate::error::Error;
use crate::governor::{condense_item, Mode};
use crate::metrics::Recorder;

use super::envelope::{ResultEnvelope, ToolEntry};

pub struct CondenserMiddleware {
    config: Arc<ProxyConfig>,
    /// Registered tool name -> server name. `None` in single-upstream mode.
    tool_server_map: Option<HashMap<String, String>>,
    registry: Arc<ParserRegistry>,
    counter: Arc<dyn TokenCounter>,
    metrics: Arc<dyn Recorder>,
}

impl CondenserMiddleware {
    pub fn new(
        config: Arc<ProxyConfig>,
        tool_server_map: Option<HashMap<String, String>>,
        registry: Arc<ParserRegistry>,
        counter: Arc<dyn TokenCounter>,
        metrics: Arc<dyn Recorder>,
    ) -> Self {
        Self {
            config,
            tool_server_map,
            registry,
            counter,
            metrics,
        }
    }

    /// Server name a registered tool belongs to, for metric labels.
    pub fn resolve_server_name(&self, tool_name: &str) -> String {
        match &self.tool_server_map {
            Some(map) => map.get(tool_name).cloned().unwrap_or_else(|| "unknown".into()),
            None => self
                .config
                .servers
                .first()
                .map(|(name, _)| name.clone())
                .unwrap_or_else(|| "default".into()),
        }
    }

    /// Server config a registered tool belongs to.
    pub fn resolve_server_config(&self, tool_name: &str) -> Option<&ServerConfig> {
        match &self.tool_server_map {
            Some(map) => self.config.server(map.get(tool_name)?),
            None => match self.config.servers.as_slice() {
                [(_, cfg)] => Some(cfg),
                _ => None,
            },
        }
    }

    /// Strip the registration prefix (`<server>_`) from a tool name.
    pub fn base_tool_name(&self, tool_name: &str) -> String {
        if let Some(map) = &self.tool_server_map {
            if let Some(server_name) = map.get(tool_name) {
                if let Some(stripped) = tool_name.strip_prefix(&format!("{server_name}_")) {
                    return stripped.to_string();
                }
            }
        }
        tool_name.to_string()
    }

    /// True when any condensing path would touch this tool's results.
    pub fn should_process(&self, tool_name: &str) -> bool {
        let Some(cfg) = self.resolve_server_config(tool_name) else {
            return false;
        };
        if !cfg.condense {
            return false;
        }
        let base = self.base_tool_name(tool_name);
        cfg.toon_only_tools.contains(&base)
            || cfg.tools.as_ref().is_none_or(|ts| ts.contains(&base))
            || cfg.toon_fallback
    }

    /// Strip `output_schema` from every tool the middleware will rewrite.
    pub fn process_tool_list(&self, tools: &mut [ToolEntry]) {
        for tool in tools {
            if self.should_process(&tool.name) {
                tool.output_schema = None;
            }
        }
    }

    /// Run the governor over every text item of a tool result, then apply
    /// the effective token limit.
    pub fn process_result(
        &self,
        tool_name: &str,
        envelope: &mut ResultEnvelope,
    ) -> Result<(), Error> {
        let server_name = self.resolve_server_name(tool_name);

        let Some(cfg) = self.resolve_server_config(tool_name) else {
            self.metrics
                .record_request(tool_name, &server_name, Mode::Passthrough.as_str());
            return Ok(());
        };
        if !cfg.condense {
            self.metrics
                .record_request(tool_name, &server_name, Mode::Passthrough.as_str());
            return Ok(());
        }

        let base = self.base_tool_name(tool_name);
        let mut condensed_any = false;

        for text in envelope.texts_mut() {
            let started = Instant::now();
            let outcome = condense_item(text, &base, cfg, &self.registry, self.counter.as_ref())?;
            self.metrics.record_processing_seconds(
                tool_name,
                &server_name,
                started.elapsed().as_secs_f64(),
            );
            self.metrics
                .record_request(tool_name, &server_name, outcome.mode.as_str());

            match outcome.mode {
                Mode::Skipped => {
                    info!(
                        tool = tool_name,
                        input_tokens = outcome.input_tokens,
                        threshold = cfg.min_token_threshold,
                        "skipped, below token threshold"
                    );
                }
                Mode::Reverted => {
                    info!(
                        tool = tool_name,
                        input_tokens = outcome.input_tokens,
                        output_tokens = outcome.output_tokens,
                        "reverted, condensed output not smaller"
                    );
                }
                Mode::Passthrough => {
                    debug!(tool = tool_name, "passthrough");
                }
                _ => {}
            }

            if let Some(new_text) = outcome.text {
                let output_tokens = outcome.output_tokens.unwrap_or(0);
                self.metrics.record_tokens(
                    tool_name,
                    &server_name,
                    outcome.input_tokens,
                    output_tokens,
                );
                if outcome.input_tokens > 0 {
                    self.metrics.record_compression_ratio(
                        tool_name,
                        &server_name,
                        output_tokens as f64 / outcome.input_tokens as f64,
                    );
                }
                info!(
                    tool = tool_name,
                    mode = outcome.mode.as_str(),
                    format = outcome.format.as_deref().unwrap_or(""),
                    input_tokens = outcome.input_tokens,
                    output_tokens,
                    reduction_pct = format!(
                        "{:.1}",
                        (1.0 - output_tokens as f64 / outcome.input_tokens.max(1) as f64) * 100.0
                    ),
                    "condensed"
                );
                *text = new_text;
                condensed_any = true;
            }
        }

        if condensed_any {
            envelope.structured = None;
        }

        // Token cap runs over the final text, rewritten or not
        let limit = cfg.token_limit_for(&base);
        if limit > 0 {
            for text in envelope.texts_mut() {
                let truncated = truncate_to_token_limit(text, limit, self.counter.as_ref());
                if truncated != *text {
                    info!(tool = tool_name, limit, "truncated to token limit");
                    self.metrics.record_truncation(tool_name, &server_name);
                    *text = truncated;
                }
            }
        }

        Ok(())
    }
}
