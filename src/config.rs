//! Proxy configuration.
//!
//! Two modes, auto-selected by `ProxyConfig::load`:
//!   1. Multi-upstream: `TOOLTRIM_CONFIG` points at a JSON file with a
//!      `global` section and named `servers`.
//!   2. Single-upstream: everything from `TOOLTRIM_*` environment variables,
//!      with `TOOLTRIM_UPSTREAM_URL` required.
//!
//! Configuration is immutable after load; heuristics and profiles are
//! validated eagerly so a typo fails at startup, not on the first payload.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Number, Value};

use crate::algo::reduce::Heuristics;
use crate::error::Error;

/// Named heuristic presets. Profile defaults are overridden by per-server
/// heuristics, which are overridden by per-tool heuristics.
pub const PROFILES: [&str; 3] = ["default", "conservative", "aggressive"];

/// Resolve a profile name to its preset.
pub fn profile_heuristics(name: &str) -> Result<Heuristics, Error> {
    let mut h = Heuristics::default();
    match name {
        "default" => {}
        // Keep every value visible: only drop columns that carry nothing at all
        "conservative" => {
            h.elide_timestamps = false;
            h.elide_constants = false;
            h.elide_mostly_zero_pct = 0.0;
        }
        // Trim noisy wide telemetry tables hard
        "aggressive" => {
            h.elide_mostly_zero_pct = 0.9;
            h.max_table_columns = 24;
            h.wide_table_threshold = 16;
        }
        unknown => {
            return Err(Error::BadConfig(format!(
                "unknown profile {unknown:?}. Valid profiles are: {}",
                PROFILES.join(", ")
            )));
        }
    }
    Ok(h)
}

fn default_true() -> bool {
    true
}

/// Per-upstream server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub url: String,
    /// Condense allowlist; `None` means all tools (`"*"` in the file).
    #[serde(default, deserialize_with = "deserialize_tools")]
    pub tools: Option<Vec<String>>,
    /// Static headers sent to the upstream. Override forwarded headers on
    /// collision.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Incoming-header forwarding map: source name -> destination name.
    #[serde(default)]
    pub forward_headers: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub condense: bool,
    /// Tools encoded directly to tabular text, skipping the reducer.
    #[serde(default)]
    pub toon_only_tools: Vec<String>,
    /// Encode tools outside every list instead of passing them through.
    #[serde(default = "default_true")]
    pub toon_fallback: bool,
    /// Skip condensing below this input token count. 0 = off.
    #[serde(default)]
    pub min_token_threshold: usize,
    /// Keep the original when the condensed output is not smaller.
    #[serde(default)]
    pub revert_if_larger: bool,
    /// Token cap applied after condensing. 0 = off.
    #[serde(default)]
    pub max_token_limit: usize,
    /// Per-tool overrides of `max_token_limit`.
    #[serde(default)]
    pub tool_token_limits: BTreeMap<String, usize>,
    /// Heuristic overrides applied on top of the profile.
    #[serde(default)]
    pub heuristics: Map<String, Value>,
    /// Per-tool heuristic overrides applied on top of `heuristics`.
    #[serde(default)]
    pub tool_heuristics: BTreeMap<String, Map<String, Value>>,
    /// Named preset the overrides start from.
    #[serde(default)]
    pub profile: Option<String>,
    /// Parser tried first for this server's payloads.
    #[serde(default)]
    pub format_hint: Option<String>,
    /// Per-tool parser hints.
    #[serde(default)]
    pub tool_format_hints: BTreeMap<String, String>,
    /// Optional read timeout for upstream calls, in seconds.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            tools: None,
            headers: BTreeMap::new(),
            forward_headers: BTreeMap::new(),
            condense: true,
            toon_only_tools: Vec::new(),
            toon_fallback: true,
            min_token_threshold: 0,
            revert_if_larger: false,
            max_token_limit: 0,
            tool_token_limits: BTreeMap::new(),
            heuristics: Map::new(),
            tool_heuristics: BTreeMap::new(),
            profile: None,
            format_hint: None,
            tool_format_hints: BTreeMap::new(),
            request_timeout_secs: None,
        }
    }
}

fn deserialize_tools<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s == "*" => Ok(None),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                other => Err(serde::de::Error::custom(format!(
                    "tool names must be strings, got {other}"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(other) => Err(serde::de::Error::custom(format!(
            "tools must be \"*\" or a list of names, got {other}"
        ))),
    }
}

impl ServerConfig {
    /// Heuristics for one tool: profile defaults, then server overrides,
    /// then per-tool overrides.
    pub fn effective_heuristics(&self, base_tool: &str) -> Result<Heuristics, Error> {
        let mut h = match &self.profile {
            Some(name) => profile_heuristics(name)?,
            None => Heuristics::default(),
        };
        h.apply(&self.heuristics)?;
        if let Some(tool_opts) = self.tool_heuristics.get(base_tool) {
            h.apply(tool_opts)?;
        }
        Ok(h)
    }

    /// Parser hint for one tool: per-tool hint wins over the server hint.
    pub fn format_hint_for(&self, base_tool: &str) -> Option<&str> {
        self.tool_format_hints
            .get(base_tool)
            .or(self.format_hint.as_ref())
            .map(String::as_str)
    }

    /// Effective token cap for one tool. 0 = no limit.
    pub fn token_limit_for(&self, base_tool: &str) -> usize {
        self.tool_token_limits
            .get(base_tool)
            .copied()
            .unwrap_or(self.max_token_limit)
    }

    /// Fail fast on bad profiles or heuristic names anywhere in this server.
    fn validate(&self, server_name: &str) -> Result<(), Error> {
        self.effective_heuristics("")
            .map_err(|e| Error::BadConfig(format!("server {server_name:?}: {e}")))?;
        for tool in self.tool_heuristics.keys() {
            self.effective_heuristics(tool)
                .map_err(|e| Error::BadConfig(format!("server {server_name:?}, tool {tool:?}: {e}")))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
struct RawGlobal {
    host: Option<String>,
    port: Option<u16>,
    prefix_tools: Option<bool>,
    metrics_enabled: Option<bool>,
    metrics_port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    global: RawGlobal,
    #[serde(default)]
    servers: Map<String, Value>,
}

/// Full proxy configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Named upstreams in declaration order.
    pub servers: Vec<(String, ServerConfig)>,
    pub host: String,
    pub port: u16,
    pub multi_upstream: bool,
    /// Register tools as `<server>_<tool>`. When disabled, name collisions
    /// across upstreams are fatal at startup.
    pub prefix_tools: bool,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

impl ProxyConfig {
    /// Look up a server by name.
    pub fn server(&self, name: &str) -> Option<&ServerConfig> {
        self.servers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, cfg)| cfg)
    }

    /// `TOOLTRIM_CONFIG` file when set, environment variables otherwise.
    pub fn load() -> Result<Self, Error> {
        match std::env::var("TOOLTRIM_CONFIG") {
            Ok(path) if !path.is_empty() => Self::from_file(Path::new(&path)),
            _ => Self::from_env(),
        }
    }

    /// Multi-upstream mode from a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::BadConfig(format!("cannot read {}: {e}", path.display())))?;
        let value: Value = serde_json::from_str(&raw)
            .map_err(|e| Error::BadConfig(format!("malformed config {}: {e}", path.display())))?;
        Self::from_json(value)
    }

    /// Multi-upstream mode from an already-parsed JSON document.
    pub fn from_json(value: Value) -> Result<Self, Error> {
        let raw: RawConfig = serde_json::from_value(value)
            .map_err(|e| Error::BadConfig(format!("malformed config: {e}")))?;

        let mut servers = Vec::new();
        for (name, srv) in raw.servers {
            let cfg: ServerConfig = serde_json::from_value(srv)
                .map_err(|e| Error::BadConfig(format!("server {name:?}: {e}")))?;
            if cfg.url.is_empty() {
                return Err(Error::BadConfig(format!("server {name:?}: url is required")));
            }
            cfg.validate(&name)?;
            servers.push((name, cfg));
        }
        if servers.is_empty() {
            return Err(Error::BadConfig("config defines no servers".into()));
        }

        Ok(Self {
            servers,
            host: raw.global.host.unwrap_or_else(|| "0.0.0.0".into()),
            port: raw.global.port.unwrap_or(9000),
            multi_upstream: true,
            prefix_tools: raw.global.prefix_tools.unwrap_or(true),
            metrics_enabled: raw.global.metrics_enabled.unwrap_or(false),
            metrics_port: raw.global.metrics_port.unwrap_or(9090),
        })
    }

    /// Single-upstream mode from `TOOLTRIM_*` environment variables:
    ///
    /// - `TOOLTRIM_UPSTREAM_URL`: upstream MCP URL (required)
    /// - `TOOLTRIM_TOOLS`: comma-separated allowlist, or `*` for all
    /// - `TOOLTRIM_TOON_ONLY_TOOLS`: comma-separated direct-encode tools
    /// - `TOOLTRIM_TOON_FALLBACK`: encode unmatched tools (default true)
    /// - `TOOLTRIM_MIN_TOKEN_THRESHOLD`: skip below this size (default 0)
    /// - `TOOLTRIM_REVERT_IF_LARGER`: keep originals that grew (default false)
    /// - `TOOLTRIM_MAX_TOKEN_LIMIT`: global output cap (default 0 = off)
    /// - `TOOLTRIM_TOOL_TOKEN_LIMITS`: comma-separated `tool:limit` pairs
    /// - `TOOLTRIM_HEURISTICS`: comma-separated `name:value` pairs
    /// - `TOOLTRIM_PROFILE`: heuristic preset name
    /// - `TOOLTRIM_FORMAT_HINT`: parser tried first
    /// - `TOOLTRIM_HEADERS`: JSON object of static upstream headers
    /// - `TOOLTRIM_TIMEOUT_SECS`: upstream read timeout
    /// - `TOOLTRIM_HOST` / `TOOLTRIM_PORT`: bind address (0.0.0.0:9000)
    /// - `TOOLTRIM_METRICS_ENABLED` / `TOOLTRIM_METRICS_PORT`: exporter (9090)
    pub fn from_env() -> Result<Self, Error> {
        Self::from_env_lookup(|name| std::env::var(name).ok())
    }

    /// `from_env` against an explicit lookup, for tests.
    pub fn from_env_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let url = var("TOOLTRIM_UPSTREAM_URL")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                Error::BadConfig("TOOLTRIM_UPSTREAM_URL environment variable is required".into())
            })?;

        let tools = match var("TOOLTRIM_TOOLS").map(|v| v.trim().to_string()) {
            None => None,
            Some(v) if v == "*" || v.is_empty() => None,
            Some(v) => Some(split_list(&v)),
        };

        let headers = match var("TOOLTRIM_HEADERS") {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)
                .map_err(|e| Error::BadConfig(format!("TOOLTRIM_HEADERS is not a JSON object: {e}")))?,
            _ => BTreeMap::new(),
        };

        let cfg = ServerConfig {
            url,
            tools,
            headers,
            toon_only_tools: var("TOOLTRIM_TOON_ONLY_TOOLS")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            toon_fallback: var("TOOLTRIM_TOON_FALLBACK").map_or(true, |v| env_bool(&v)),
            min_token_threshold: env_number(&var, "TOOLTRIM_MIN_TOKEN_THRESHOLD")?,
            revert_if_larger: var("TOOLTRIM_REVERT_IF_LARGER").is_some_and(|v| env_bool(&v)),
            max_token_limit: env_number(&var, "TOOLTRIM_MAX_TOKEN_LIMIT")?,
            tool_token_limits: parse_limit_pairs(&var("TOOLTRIM_TOOL_TOKEN_LIMITS").unwrap_or_default())?,
            heuristics: parse_heuristic_pairs(&var("TOOLTRIM_HEURISTICS").unwrap_or_default()),
            profile: var("TOOLTRIM_PROFILE").filter(|v| !v.is_empty()),
            format_hint: var("TOOLTRIM_FORMAT_HINT").filter(|v| !v.is_empty()),
            request_timeout_secs: match var("TOOLTRIM_TIMEOUT_SECS") {
                Some(v) if !v.trim().is_empty() => Some(v.trim().parse().map_err(|_| {
                    Error::BadConfig(format!("TOOLTRIM_TIMEOUT_SECS is not a number: {v:?}"))
                })?),
                _ => None,
            },
            ..ServerConfig::default()
        };
        cfg.validate("default")?;

        Ok(Self {
            servers: vec![("default".to_string(), cfg)],
            host: var("TOOLTRIM_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: env_number(&var, "TOOLTRIM_PORT")?.try_into().ok().filter(|p| *p > 0).unwrap_or(9000),
            multi_upstream: false,
            prefix_tools: true,
            metrics_enabled: var("TOOLTRIM_METRICS_ENABLED").is_some_and(|v| env_bool(&v)),
            metrics_port: match env_number(&var, "TOOLTRIM_METRICS_PORT")? {
                0 => 9090,
                p => p.try_into().map_err(|_| {
                    Error::BadConfig("TOOLTRIM_METRICS_PORT is out of range".into())
                })?,
            },
        })
    }
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn env_bool(v: &str) -> bool {
    !matches!(v.trim().to_lowercase().as_str(), "false" | "0" | "no" | "")
}

fn env_number(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<usize, Error> {
    match var(name) {
        None => Ok(0),
        Some(v) if v.trim().is_empty() => Ok(0),
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| Error::BadConfig(format!("{name} is not a number: {v:?}"))),
    }
}

/// Parse `tool:limit` pairs.
fn parse_limit_pairs(raw: &str) -> Result<BTreeMap<String, usize>, Error> {
    let mut out = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((name, limit)) = pair.rsplit_once(':') else {
            return Err(Error::BadConfig(format!(
                "token limit entry {pair:?} is not a tool:limit pair"
            )));
        };
        let limit = limit.trim().parse().map_err(|_| {
            Error::BadConfig(format!("token limit for {name:?} is not a number: {limit:?}"))
        })?;
        out.insert(name.trim().to_string(), limit);
    }
    Ok(out)
}

/// Parse `name:value` heuristic pairs: integers, floats, and booleans are
/// typed; everything else stays a string (e.g. `wide_table_format:split`).
pub fn parse_heuristic_pairs(raw: &str) -> Map<String, Value> {
    let mut out = Map::new();
    for pair in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((name, val)) = pair.rsplit_once(':') else { continue };
        let val = val.trim();
        let parsed = if let Ok(i) = val.parse::<i64>() {
            Value::Number(i.into())
        } else if let Ok(f) = val.parse::<f64>() {
            Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
        } else if val.eq_ignore_ascii_case("true") {
            Value::Bool(true)
        } else if val.eq_ignore_ascii_case("false") {
            Value::Bool(false)
        } else {
            Value::String(val.to_string())
        };
        out.insert(name.trim().to_string(), parsed);
    }
    out
}
