//! Extensible parser registry for structured text payloads.
//!
//! Ships with JSON, YAML, CSV/TSV, and XML parsers in that priority order.
//! Additional formats can be registered at startup; after the first request
//! the registry is treated as frozen and shared behind an `Arc`.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Number, Value};

use crate::error::Error;

/// How much of the input the CSV dialect sniffer looks at.
const SNIFF_WINDOW: usize = 8 * 1024;

/// Candidate CSV/TSV delimiters, checked in this order.
const DELIMITERS: [u8; 4] = [b',', b'\t', b'|', b';'];

static INT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^-?\d+$").unwrap());
static FLOAT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?(\d+\.\d*|\.\d+|\d+[eE][+-]?\d+|\d+\.\d*[eE][+-]?\d+)$").unwrap());

/// A pluggable input parser.
pub struct Parser {
    /// Short identifier used in format hints and error messages.
    pub name: String,
    /// Predicate-parse: return the value tree on success, `None` to signal
    /// "not my format".
    pub try_parse: Box<dyn Fn(&str) -> Option<Value> + Send + Sync>,
    /// Optional post-parse transform (e.g. CSV cell coercion).
    pub normalize: Option<Box<dyn Fn(Value) -> Value + Send + Sync>>,
}

impl Parser {
    pub fn new(
        name: impl Into<String>,
        try_parse: impl Fn(&str) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            try_parse: Box::new(try_parse),
            normalize: None,
        }
    }

    pub fn with_normalize(
        mut self,
        normalize: impl Fn(Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.normalize = Some(Box::new(normalize));
        self
    }

    fn run(&self, text: &str) -> Option<Value> {
        let data = (self.try_parse)(text)?;
        Some(match &self.normalize {
            Some(normalize) => normalize(data),
            None => data,
        })
    }
}

/// Ordered parser list. Mutable only during startup registration.
pub struct ParserRegistry {
    parsers: Vec<Parser>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ParserRegistry {
    /// Registry with the four built-in parsers.
    pub fn builtin() -> Self {
        Self {
            parsers: vec![
                Parser::new("json", try_json),
                Parser::new("yaml", try_yaml),
                Parser::new("csv", try_csv).with_normalize(normalize_csv),
                Parser::new("xml", try_xml),
            ],
        }
    }

    /// Registry with no parsers; useful for fully custom stacks.
    pub fn empty() -> Self {
        Self { parsers: Vec::new() }
    }

    /// Append a parser at lowest priority (tried last).
    pub fn register(&mut self, parser: Parser) {
        self.parsers.push(parser);
    }

    /// Insert a parser at the given priority (0 = highest, tried first).
    pub fn register_at(&mut self, priority: usize, parser: Parser) {
        let idx = priority.min(self.parsers.len());
        self.parsers.insert(idx, parser);
    }

    /// Registered parser names in priority order.
    pub fn names(&self) -> Vec<&str> {
        self.parsers.iter().map(|p| p.name.as_str()).collect()
    }

    /// Parse `text` with the first matching parser.
    ///
    /// When `format_hint` names a registered parser it is tried first; if it
    /// declines, the remaining parsers are tried in registry order. An
    /// unknown hint is not an error and falls through to the full scan.
    pub fn parse_input(&self, text: &str, format_hint: Option<&str>) -> Result<(Value, String), Error> {
        if let Some(hint) = format_hint {
            if let Some(p) = self.parsers.iter().find(|p| p.name == hint) {
                if let Some(data) = p.run(text) {
                    return Ok((data, p.name.clone()));
                }
            }
        }

        for p in &self.parsers {
            if format_hint == Some(p.name.as_str()) {
                continue; // already failed above
            }
            if let Some(data) = p.run(text) {
                return Ok((data, p.name.clone()));
            }
        }

        Err(Error::NotStructured(self.names().join(", ")))
    }
}

// ── scalar coercion ─────────────────────────────────────────────────────────

/// Coerce a raw text cell: empty string to Null, integer syntax to Integer,
/// float syntax to Float, optionally `true`/`false` to Bool, else String.
fn coerce_scalar(s: &str, parse_bool: bool) -> Value {
    if s.is_empty() {
        return Value::Null;
    }
    if parse_bool {
        match s {
            "true" => return Value::Bool(true),
            "false" => return Value::Bool(false),
            _ => {}
        }
    }
    if INT_RE.is_match(s) {
        if let Ok(i) = s.parse::<i64>() {
            return Value::Number(i.into());
        }
    }
    if FLOAT_RE.is_match(s) {
        if let Ok(f) = s.parse::<f64>() {
            if let Some(n) = Number::from_f64(f) {
                return Value::Number(n);
            }
        }
    }
    Value::String(s.to_string())
}

// ── JSON ────────────────────────────────────────────────────────────────────

fn try_json(text: &str) -> Option<Value> {
    serde_json::from_str(text).ok()
}

// ── YAML ────────────────────────────────────────────────────────────────────

/// YAML happily parses any plain text as a scalar, so only top-level
/// mappings and sequences count as a match.
fn try_yaml(text: &str) -> Option<Value> {
    let data: Value = serde_yaml::from_str(text).ok()?;
    match data {
        Value::Object(_) | Value::Array(_) => Some(data),
        _ => None,
    }
}

// ── CSV / TSV ───────────────────────────────────────────────────────────────

/// Pick the delimiter whose count on the header line is highest and
/// consistent across the sampled lines.
fn sniff_delimiter(text: &str) -> Option<u8> {
    let mut end = text.len().min(SNIFF_WINDOW);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let window = &text[..end];
    let lines: Vec<&str> = window.lines().filter(|l| !l.trim().is_empty()).take(16).collect();
    if lines.len() < 2 {
        return None;
    }

    let mut best: Option<(u8, usize)> = None;
    for delim in DELIMITERS {
        let header_count = lines[0].bytes().filter(|&b| b == delim).count();
        if header_count == 0 {
            continue;
        }
        let consistent = lines
            .iter()
            .all(|l| l.bytes().filter(|&b| b == delim).count() == header_count);
        if consistent && best.map_or(true, |(_, c)| header_count > c) {
            best = Some((delim, header_count));
        }
    }
    best.map(|(d, _)| d)
}

/// Parse delimited text into an array of string-valued row objects.
/// Requires at least one data row and at least two columns.
fn try_csv(text: &str) -> Option<Value> {
    let delim = sniff_delimiter(text)?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delim)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .ok()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.len() < 2 {
        return None;
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.ok()?;
        let mut row = Map::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            row.insert(header.clone(), Value::String(cell.to_string()));
        }
        rows.push(Value::Object(row));
    }
    if rows.is_empty() {
        return None;
    }
    Some(Value::Array(rows))
}

/// Coerce every CSV cell after the dialect parse succeeds.
fn normalize_csv(data: Value) -> Value {
    match data {
        Value::Array(rows) => Value::Array(
            rows.into_iter()
                .map(|row| match row {
                    Value::Object(obj) => Value::Object(
                        obj.into_iter()
                            .map(|(k, v)| {
                                let coerced = match &v {
                                    Value::String(s) => coerce_scalar(s, false),
                                    _ => v,
                                };
                                (k, coerced)
                            })
                            .collect(),
                    ),
                    other => other,
                })
                .collect(),
        ),
        other => other,
    }
}

// ── XML ─────────────────────────────────────────────────────────────────────

fn try_xml(text: &str) -> Option<Value> {
    let doc = roxmltree::Document::parse(text).ok()?;
    Some(element_to_value(doc.root_element()))
}

/// Convert an element tree per the fixed rules: attributes become `@name`
/// entries, repeated child tags collapse into arrays, a text-only leaf
/// becomes its coerced scalar, mixed content stores text under `#text`,
/// and an empty leaf becomes Null.
fn element_to_value(node: roxmltree::Node) -> Value {
    let attrs: Vec<_> = node.attributes().collect();
    let children: Vec<roxmltree::Node> = node.children().filter(|c| c.is_element()).collect();
    let text = node
        .children()
        .filter(|c| c.is_text())
        .filter_map(|c| c.text())
        .collect::<String>();
    let text = text.trim();

    if attrs.is_empty() && children.is_empty() {
        return coerce_scalar(text, true);
    }

    let mut obj = Map::new();
    for attr in &attrs {
        obj.insert(format!("@{}", attr.name()), coerce_scalar(attr.value(), true));
    }
    if !text.is_empty() {
        obj.insert("#text".to_string(), coerce_scalar(text, true));
    }

    for child in &children {
        let name = child.tag_name().name().to_string();
        let value = element_to_value(*child);
        if let Some(slot) = obj.get_mut(&name) {
            // Repeated tag: collapse into an array
            if let Value::Array(arr) = slot {
                arr.push(value);
            } else {
                let first = slot.take();
                *slot = Value::Array(vec![first, value]);
            }
        } else {
            obj.insert(name, value);
        }
    }

    Value::Object(obj)
}
