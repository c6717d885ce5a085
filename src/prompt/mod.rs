//! Prompt composition under a percent-encoded length budget
//!
//! Segments are merged as `base + style + place + negative`. When the
//! encoded result is over budget, decoration is shed before the user's own
//! words: the style collapses to its name, then the place goes, then the
//! negative prompt, then the base prompt is cut at a word boundary, and as a
//! last resort the whole string is hard-cut.

pub mod style;

use serde::Serialize;

use crate::config::PromptConfig;
use crate::models::{GenerationRequest, StyleSelection};

/// Marker appended to a truncated base prompt
pub const ELLIPSIS: &str = "...";

/// Budget applied to the composed prompt
#[derive(Debug, Clone)]
pub struct PromptBudget {
    pub max_encoded_len: usize,
    pub overhead_margin: usize,
    pub hard_limit_ratio: f64,
    pub style_field_max_chars: usize,
    pub style_collapse_threshold: usize,
}

impl Default for PromptBudget {
    fn default() -> Self {
        Self::from(&PromptConfig::default())
    }
}

impl From<&PromptConfig> for PromptBudget {
    fn from(config: &PromptConfig) -> Self {
        Self {
            max_encoded_len: config.max_encoded_len,
            overhead_margin: config.overhead_margin,
            hard_limit_ratio: config.hard_limit_ratio,
            style_field_max_chars: config.style_field_max_chars,
            style_collapse_threshold: config.style_collapse_threshold,
        }
    }
}

impl PromptBudget {
    fn hard_limit(&self) -> usize {
        ((self.max_encoded_len as f64) * self.hard_limit_ratio).floor() as usize
    }
}

/// A degradation step applied while fitting the budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationStep {
    CollapseStyle,
    DropPlace,
    DropNegative,
    TruncateBase,
    ForceTruncate,
}

/// Inputs to the compositor
#[derive(Debug, Clone, Default)]
pub struct PromptParts {
    pub base: String,
    pub style: StyleSelection,
    pub place: Option<String>,
    pub negative: Option<String>,
}

impl PromptParts {
    /// Collect segments from a request; `include_negative` is false for
    /// providers that take the negative prompt as a separate field
    pub fn from_request(request: &GenerationRequest, include_negative: bool) -> Self {
        Self {
            base: request.base_prompt.clone(),
            style: request.style.clone(),
            place: request.place.clone(),
            negative: if include_negative {
                request.negative_prompt.clone()
            } else {
                None
            },
        }
    }
}

/// Result of composition
#[derive(Debug, Clone)]
pub struct ComposedPrompt {
    pub text: String,
    pub truncated: bool,
    pub steps: Vec<TruncationStep>,
}

/// Length of `text` once percent-encoded
pub fn encoded_len(text: &str) -> usize {
    urlencoding::encode(text).len()
}

struct Segments {
    base: String,
    style: String,
    place: String,
    negative: String,
}

impl Segments {
    fn join(&self) -> String {
        format!("{}{}{}{}", self.base, self.style, self.place, self.negative)
    }
}

fn optional_segment(value: Option<&str>, prefix: &str) -> String {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => format!("{}{}", prefix, v),
        None => String::new(),
    }
}

/// Compose the final prompt, degrading in priority order until it fits
pub fn compose(parts: &PromptParts, budget: &PromptBudget) -> ComposedPrompt {
    let mut segments = Segments {
        base: parts.base.trim().to_string(),
        style: style::full_segment(&parts.style, budget.style_field_max_chars),
        place: optional_segment(parts.place.as_deref(), ", set in "),
        negative: optional_segment(parts.negative.as_deref(), ", avoiding "),
    };
    let mut steps = Vec::new();
    let fits = |text: &str| encoded_len(text) <= budget.max_encoded_len;

    let mut text = segments.join();
    if fits(&text) {
        return ComposedPrompt {
            text,
            truncated: false,
            steps,
        };
    }

    if style::has_metadata(&parts.style)
        && segments.style.chars().count() > budget.style_collapse_threshold
    {
        segments.style = style::name_segment(&parts.style, budget.style_field_max_chars);
        steps.push(TruncationStep::CollapseStyle);
        text = segments.join();
    }

    if !fits(&text) && !segments.place.is_empty() {
        segments.place.clear();
        steps.push(TruncationStep::DropPlace);
        text = segments.join();
    }

    if !fits(&text) && !segments.negative.is_empty() {
        segments.negative.clear();
        steps.push(TruncationStep::DropNegative);
        text = segments.join();
    }

    if !fits(&text) {
        let available = budget
            .max_encoded_len
            .saturating_sub(encoded_len(&segments.style))
            .saturating_sub(budget.overhead_margin);
        if let Some(shortened) = truncate_at_word(&segments.base, available) {
            segments.base = shortened;
            steps.push(TruncationStep::TruncateBase);
            text = segments.join();
        }
    }

    if !fits(&text) {
        text = force_truncate(&text, budget.hard_limit());
        steps.push(TruncationStep::ForceTruncate);
    }

    ComposedPrompt {
        text,
        truncated: !steps.is_empty(),
        steps,
    }
}

/// Longest whole-word prefix of `base` that fits `available` encoded bytes
/// with the ellipsis appended. `None` when the base already fits or not even
/// one word does.
fn truncate_at_word(base: &str, available: usize) -> Option<String> {
    if encoded_len(base) <= available {
        return None;
    }

    let mut best: Option<&str> = None;
    for (idx, ch) in base.char_indices() {
        if !ch.is_whitespace() {
            continue;
        }
        let candidate = base[..idx].trim_end();
        if candidate.is_empty() {
            continue;
        }
        if encoded_len(candidate) + encoded_len(ELLIPSIS) > available {
            break;
        }
        best = Some(candidate);
    }

    best.map(|prefix| format!("{}{}", prefix, ELLIPSIS))
}

/// Cut `text` so its encoded length is at most `limit`, ignoring word boundaries
fn force_truncate(text: &str, limit: usize) -> String {
    let mut used = 0;
    let mut end = 0;
    let mut buf = [0u8; 4];
    for (idx, ch) in text.char_indices() {
        let cost = encoded_len(ch.encode_utf8(&mut buf));
        if used + cost > limit {
            break;
        }
        used += cost;
        end = idx + ch.len_utf8();
    }
    text[..end]
        .trim_end_matches(|c: char| c.is_whitespace() || c == ',')
        .to_string()
}
