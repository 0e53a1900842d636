//! Input canonicalization and the public length gate.
//!
//! This is the only place raw text is rejected outright. A rejection
//! short-circuits the pipeline before any analysis runs.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::GovernanceConfig;

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Canonical form of one request's text. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    text: String,
    char_len: usize,
    token_count: usize,
}

impl Utterance {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn char_len(&self) -> usize {
        self.char_len
    }

    pub fn token_count(&self) -> usize {
        self.token_count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    TooShort,
    TooLong,
}

impl RejectionReason {
    pub const ALL: [RejectionReason; 2] = [RejectionReason::TooShort, RejectionReason::TooLong];

    pub fn as_str(self) -> &'static str {
        match self {
            RejectionReason::TooShort => "too_short",
            RejectionReason::TooLong => "too_long",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectionReason,
    pub length: usize,
    pub min_chars: usize,
    pub max_chars: usize,
}

/// Length bounds, copied out of the config so the gate stays `Copy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthGate {
    pub min_chars: usize,
    pub max_chars: usize,
}

impl LengthGate {
    pub fn from_config(config: &GovernanceConfig) -> Self {
        Self {
            min_chars: config.min_chars,
            max_chars: config.max_chars,
        }
    }

    /// Canonicalize `raw` and enforce the bounds.
    ///
    /// The maximum applies to the raw char count so oversized payloads are
    /// refused before any work is spent on them; the minimum applies to the
    /// normalized text so whitespace-only input is `too_short`.
    pub fn normalize(&self, raw: &str) -> Result<Utterance, Rejection> {
        let raw_len = raw.chars().count();
        if raw_len > self.max_chars {
            return Err(self.reject(RejectionReason::TooLong, raw_len));
        }

        let text = canonicalize(raw);
        let char_len = text.chars().count();
        if char_len < self.min_chars {
            return Err(self.reject(RejectionReason::TooShort, char_len));
        }

        let token_count = count_tokens(&text);
        Ok(Utterance {
            text,
            char_len,
            token_count,
        })
    }

    fn reject(&self, reason: RejectionReason, length: usize) -> Rejection {
        Rejection {
            reason,
            length,
            min_chars: self.min_chars,
            max_chars: self.max_chars,
        }
    }
}

/// Strip control characters, trim, and collapse whitespace runs to one space.
pub fn canonicalize(raw: &str) -> String {
    let visible: String = raw
        .chars()
        .map(|ch| if ch.is_control() { ' ' } else { ch })
        .collect();
    WHITESPACE_RUN
        .replace_all(visible.trim(), " ")
        .into_owned()
}

/// Language-agnostic token count: whitespace-delimited words, except that
/// every ideographic or kana character counts as its own token.
pub fn count_tokens(text: &str) -> usize {
    let mut tokens = 0;
    for word in text.split_whitespace() {
        let mut in_run = false;
        for ch in word.chars() {
            if is_cjk(ch) {
                tokens += 1;
                in_run = false;
            } else if ch.is_alphanumeric() {
                if !in_run {
                    tokens += 1;
                    in_run = true;
                }
            } else {
                in_run = in_run && (ch == '\'' || ch == '-');
            }
        }
    }
    tokens
}

pub(crate) fn is_cjk(ch: char) -> bool {
    matches!(ch as u32,
        0x3040..=0x30FF   // hiragana, katakana
        | 0x3400..=0x4DBF // CJK extension A
        | 0x4E00..=0x9FFF // CJK unified
        | 0xAC00..=0xD7AF // hangul syllables
        | 0xF900..=0xFAFF)
}
