//! Per-item condensing decisions.
//!
//! The governor wraps the pure pipeline with the policy knobs from
//! `ServerConfig`: parse-or-passthrough, minimum-size skip, mode selection,
//! and revert-if-larger. Token-limit truncation runs later, over the final
//! item text, in the middleware.

use tracing::warn;

use crate::algo::parsers::ParserRegistry;
use crate::algo::render::condense_value;
use crate::algo::tokens::TokenCounter;
use crate::algo::toon;
use crate::config::ServerConfig;
use crate::error::Error;

/// Payloads above this size pass through unmodified.
pub const MAX_PAYLOAD_BYTES: usize = 8 * 1024 * 1024;

/// What the governor decided for one text item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Full condensing pipeline.
    Condense,
    /// Direct tabular encoding, no reductions.
    ToonOnly,
    /// Direct tabular encoding for a tool outside every list.
    ToonFallback,
    /// Original text kept (unparseable, oversize, or tool excluded).
    Passthrough,
    /// Input below the minimum token threshold.
    Skipped,
    /// Condensed output was not smaller than the input.
    Reverted,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Condense => "condense",
            Mode::ToonOnly => "toon_only",
            Mode::ToonFallback => "toon_fallback",
            Mode::Passthrough => "passthrough",
            Mode::Skipped => "skipped",
            Mode::Reverted => "reverted",
        }
    }
}

/// Governor verdict for one item. `text` is `Some` only when the item was
/// rewritten.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub mode: Mode,
    pub text: Option<String>,
    /// Detected input format, when parsing succeeded.
    pub format: Option<String>,
    pub input_tokens: usize,
    /// Condensed size, measured even for reverted outcomes.
    pub output_tokens: Option<usize>,
}

impl Outcome {
    fn keep_original(mode: Mode, input_tokens: usize) -> Self {
        Self {
            mode,
            text: None,
            format: None,
            input_tokens,
            output_tokens: None,
        }
    }
}

/// Decide and apply the condensing mode for one text item.
///
/// `base_tool` is the tool name with any registration prefix already
/// stripped. Never fails on payload content; the only error path is a
/// malformed heuristics configuration.
pub fn condense_item(
    text: &str,
    base_tool: &str,
    cfg: &ServerConfig,
    registry: &ParserRegistry,
    counter: &dyn TokenCounter,
) -> Result<Outcome, Error> {
    let input_tokens = counter.count(text);

    if text.len() > MAX_PAYLOAD_BYTES {
        warn!(
            tool = base_tool,
            bytes = text.len(),
            limit = MAX_PAYLOAD_BYTES,
            "payload above condensing ceiling, passing through"
        );
        return Ok(Outcome::keep_original(Mode::Passthrough, input_tokens));
    }

    let hint = cfg.format_hint_for(base_tool);
    let (data, format) = match registry.parse_input(text, hint) {
        Ok(parsed) => parsed,
        Err(Error::NotStructured(_)) => {
            return Ok(Outcome::keep_original(Mode::Passthrough, input_tokens));
        }
        Err(other) => return Err(other),
    };

    if cfg.min_token_threshold > 0 && input_tokens < cfg.min_token_threshold {
        return Ok(Outcome::keep_original(Mode::Skipped, input_tokens));
    }

    let mode = if cfg.toon_only_tools.iter().any(|t| t == base_tool) {
        Mode::ToonOnly
    } else if cfg.tools.as_ref().is_none_or(|ts| ts.iter().any(|t| t == base_tool)) {
        Mode::Condense
    } else if cfg.toon_fallback {
        Mode::ToonFallback
    } else {
        return Ok(Outcome::keep_original(Mode::Passthrough, input_tokens));
    };

    let condensed = match mode {
        Mode::Condense => {
            let heuristics = cfg.effective_heuristics(base_tool)?;
            condense_value(&data, &heuristics)
        }
        _ => toon::encode(&data),
    };

    let output_tokens = counter.count(&condensed);
    if cfg.revert_if_larger && output_tokens >= input_tokens {
        return Ok(Outcome {
            mode: Mode::Reverted,
            text: None,
            format: Some(format),
            input_tokens,
            output_tokens: Some(output_tokens),
        });
    }

    Ok(Outcome {
        mode,
        text: Some(condensed),
        format: Some(format),
        input_tokens,
        output_tokens: Some(output_tokens),
    })
}
