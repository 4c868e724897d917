//! Shared operation wrappers for all interfaces (CLI, proxy middleware).
//!
//! Each `op_*` function is a pure, synchronous wrapper around the `algo`
//! modules. Input and output are plain strings and `serde_json::Value`; no
//! dependency on rmcp, clap, or the config layer.

use serde_json::Value;

use crate::algo::parsers::ParserRegistry;
use crate::algo::reduce::Heuristics;
use crate::algo::render::condense_value;
use crate::algo::tokens::{CondenseStats, TokenCounter};
use crate::algo::toon;
use crate::error::Error;

/// Parse structured text and run the full condensing pipeline.
/// Returns the condensed text and the detected input format name.
pub fn op_condense_text(
    text: &str,
    registry: &ParserRegistry,
    format_hint: Option<&str>,
    heuristics: &Heuristics,
) -> Result<(String, String), Error> {
    let (data, format) = registry.parse_input(text, format_hint)?;
    Ok((condense_value(&data, heuristics), format))
}

/// Parse structured text and encode it directly as tabular text, with no
/// semantic reductions.
pub fn op_encode_text(
    text: &str,
    registry: &ParserRegistry,
    format_hint: Option<&str>,
) -> Result<(String, String), Error> {
    let (data, format) = registry.parse_input(text, format_hint)?;
    Ok((toon::encode(&data), format))
}

/// Condense an already-parsed value.
pub fn op_condense_value(data: &Value, heuristics: &Heuristics) -> String {
    condense_value(data, heuristics)
}

/// Encode an already-parsed value without preprocessing.
pub fn op_encode_value(data: &Value) -> String {
    toon::encode(data)
}

/// Compression summary for a payload before/after pair.
pub fn op_stats(orig: &str, cond: &str, counter: &dyn TokenCounter) -> CondenseStats {
    CondenseStats::measure(orig, cond, counter)
}
