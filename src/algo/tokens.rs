//! Token counting and token-limit truncation.
//!
//! Counting is pluggable so a real tokenizer can be dropped in; governor
//! decisions only need a deterministic estimate that is monotone in text
//! length. The default estimator is bytes divided by four.

use std::fmt;

/// Deterministic token counter. Implementations must be monotone in text
/// length and roughly proportional to it.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;

    /// Short label for logs and stats output.
    fn method(&self) -> &'static str {
        "custom"
    }
}

/// The bytes/4 estimate used when no tokenizer is installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimateCounter;

impl TokenCounter for EstimateCounter {
    fn count(&self, text: &str) -> usize {
        text.len() / 4
    }

    fn method(&self) -> &'static str {
        "bytes/4 estimate"
    }
}

/// Count with the default estimator.
pub fn count_tokens(text: &str) -> usize {
    EstimateCounter.count(text)
}

/// Compression summary for one payload.
#[derive(Debug, Clone, Copy)]
pub struct CondenseStats {
    pub orig_chars: usize,
    pub cond_chars: usize,
    pub orig_tokens: usize,
    pub cond_tokens: usize,
}

impl CondenseStats {
    pub fn measure(orig: &str, cond: &str, counter: &dyn TokenCounter) -> Self {
        Self {
            orig_chars: orig.len(),
            cond_chars: cond.len(),
            orig_tokens: counter.count(orig),
            cond_tokens: counter.count(cond),
        }
    }

    /// Character reduction as a percentage of the original, one decimal.
    pub fn char_pct(&self) -> f64 {
        pct(self.orig_chars, self.cond_chars)
    }

    /// Token reduction as a percentage of the original, one decimal.
    pub fn token_pct(&self) -> f64 {
        pct(self.orig_tokens, self.cond_tokens)
    }
}

fn pct(orig: usize, cond: usize) -> f64 {
    if orig == 0 {
        return 0.0;
    }
    ((1.0 - cond as f64 / orig as f64) * 1000.0).round() / 10.0
}

impl fmt::Display for CondenseStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} chars ({} tokens) -> {} chars ({} tokens), {}% token reduction",
            self.orig_chars, self.orig_tokens, self.cond_chars, self.cond_tokens, self.token_pct()
        )
    }
}

fn truncation_notice(max_tokens: usize, orig_tokens: usize, final_tokens: usize) -> String {
    format!(
        "\n\n[truncated: output exceeded {max_tokens} token limit — {orig_tokens} tokens reduced to ~{final_tokens}]"
    )
}

/// Largest char-boundary index at or below `idx`.
fn floor_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Truncate `text` to fit within `max_tokens`, appending a notice with the
/// original and final token counts. A no-op when the text already fits or
/// when the limit is zero.
///
/// Binary-searches the longest prefix whose token count stays within the
/// limit minus the notice overhead.
pub fn truncate_to_token_limit(text: &str, max_tokens: usize, counter: &dyn TokenCounter) -> String {
    if max_tokens == 0 {
        return text.to_string();
    }

    let orig_tokens = counter.count(text);
    if orig_tokens <= max_tokens {
        return text.to_string();
    }

    let notice_overhead = counter.count(&truncation_notice(max_tokens, orig_tokens, max_tokens));
    let target = (max_tokens.saturating_sub(notice_overhead)).max(1);

    let mut lo = 0usize;
    let mut hi = text.len();
    while lo < hi {
        let mid = floor_boundary(text, lo + (hi - lo).div_ceil(2));
        if mid <= lo {
            break;
        }
        if counter.count(&text[..mid]) <= target {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    let cut = floor_boundary(text, lo);

    let truncated = &text[..cut];
    let final_tokens = counter.count(truncated) + notice_overhead;
    format!(
        "{truncated}{}",
        truncation_notice(max_tokens, orig_tokens, final_tokens)
    )
}
