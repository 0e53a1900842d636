//! Repair contract: the external generation seam and the deterministic
//! template/keyword fallback that backs it.
//!
//! The fallback is total over [`ToneType`] and pure, so repeated provider
//! failures still yield byte-identical repairs.

use std::future::Future;
use std::pin::Pin;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::normalize::canonicalize;
use crate::scenario::Scenario;
use crate::tone::ToneType;

/// What the provider is asked to rewrite. Borrowed for the duration of one call.
#[derive(Debug, Clone, Copy)]
pub struct RepairRequest<'a> {
    pub text: &'a str,
    pub tone: ToneType,
    pub scenario: Scenario,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    #[error("provider timed out after {0} ms")]
    Timeout(u64),
    #[error("provider transport error: {0}")]
    Transport(String),
    #[error("provider returned status {0}")]
    Status(u16),
    #[error("provider output malformed: {0}")]
    Malformed(&'static str),
}

pub type ProviderFuture<'a> = Pin<Box<dyn Future<Output = Result<String, ProviderError>> + Send + 'a>>;

/// External generation capability: `repair(text, context) -> text | failure`.
pub trait RepairProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn repair<'a>(&'a self, request: RepairRequest<'a>) -> ProviderFuture<'a>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RepairSource {
    Provider,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    NoProvider,
    LowConfidence,
    Timeout,
    ProviderError,
    Malformed,
}

impl FallbackReason {
    pub fn from_error(err: &ProviderError) -> Self {
        match err {
            ProviderError::Timeout(_) => FallbackReason::Timeout,
            ProviderError::Transport(_) | ProviderError::Status(_) => FallbackReason::ProviderError,
            ProviderError::Malformed(_) => FallbackReason::Malformed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepairOutcome {
    pub text: String,
    pub source: RepairSource,
    pub fallback_reason: Option<FallbackReason>,
}

impl RepairOutcome {
    pub fn llm_used(&self) -> bool {
        self.source == RepairSource::Provider
    }

    pub fn fallback(text: &str, tone: ToneType, reason: FallbackReason) -> Self {
        Self {
            text: fallback_repair(text, tone),
            source: RepairSource::Fallback,
            fallback_reason: Some(reason),
        }
    }
}

/// Frame placed around the substituted text. `{text}` marks the slot.
pub fn template_for(tone: ToneType) -> &'static str {
    match tone {
        ToneType::Anxious => "I'm feeling overwhelmed and would appreciate some support: {text}",
        ToneType::Cold => "Thanks for the update. {text}",
        ToneType::Sharp => "I'd like to raise a concern: {text}",
        ToneType::Blur => "To be clear, here is what I mean: {text}",
        ToneType::Pushy => "When you have a moment, could you help with this? {text}",
        ToneType::Rhythm => "Let me put this more simply: {text}",
        ToneType::Unknown => "Here is my message: {text}",
    }
}

/// Guidance attached in suggest mode. The original text is left untouched.
pub fn guidance_for(tone: ToneType) -> &'static str {
    match tone {
        ToneType::Anxious => "This reads as worried. Naming the one thing you need first can make it easier to help.",
        ToneType::Cold => "This may come across as distant. A short acknowledgement can soften it.",
        ToneType::Sharp => "This may land as harsh. Consider describing the problem rather than the person.",
        ToneType::Blur => "The request is a little vague. Stating the outcome you want would make it clearer.",
        ToneType::Pushy => "This may feel like pressure. Giving a reason or a timeframe can help.",
        ToneType::Rhythm => "The delivery is hard to follow. Shorter sentences may read more clearly.",
        ToneType::Unknown => "The wording carries some strain. A brief pause before sending may help.",
    }
}

fn substitutions_for(tone: ToneType) -> &'static [(&'static str, &'static str)] {
    match tone {
        ToneType::Anxious => &[
            ("can't take this anymore", "am struggling with this"),
            ("cannot take this anymore", "am struggling with this"),
            ("please help", "I could use some help"),
        ],
        ToneType::Cold => &[
            ("whatever", "either option works"),
            ("don't care", "am open to either"),
            ("not my problem", "outside my area"),
            ("fine then", "that works"),
        ],
        ToneType::Sharp => &[
            ("what is wrong with you", "I'm confused by this"),
            ("are you kidding", "I'm surprised"),
            ("how many times", "as mentioned before"),
            ("stupid", "unclear"),
            ("idiot", "person"),
            ("ridiculous", "surprising"),
            ("useless", "not helpful"),
            ("nonsense", "confusing"),
            ("obviously", ""),
            ("seriously", ""),
        ],
        ToneType::Blur => &[
            ("kind of", ""),
            ("sort of", ""),
            ("i guess", "I think"),
            ("maybe", "possibly"),
            ("not sure", "uncertain"),
        ],
        ToneType::Pushy => &[
            ("you must", "could you"),
            ("you have to", "could you"),
            ("i demand", "I'd like"),
            ("right now", "soon"),
            ("immediately", "soon"),
            ("asap", "soon"),
            ("no excuses", ""),
            ("hurry up", "please"),
            ("hurry", "please"),
        ],
        ToneType::Rhythm | ToneType::Unknown => &[],
    }
}

struct CompiledSubstitution {
    tone: ToneType,
    pattern: Regex,
    replacement: &'static str,
}

static SUBSTITUTIONS: LazyLock<Vec<CompiledSubstitution>> = LazyLock::new(|| {
    ToneType::ALL
        .iter()
        .flat_map(|tone| {
            substitutions_for(*tone)
                .iter()
                .map(move |(phrase, replacement)| CompiledSubstitution {
                    tone: *tone,
                    pattern: Regex::new(&format!(r"(?i)\b{}\b", regex::escape(phrase)))
                        .expect("substitution pattern is valid"),
                    replacement,
                })
        })
        .collect()
});

static EMPHATIC_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[!?！？]{2,}").expect("emphatic pattern is valid"));
static SPACE_BEFORE_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+([,.;:!?])").expect("punctuation pattern is valid"));

/// Deterministic keyword-substitution repair, keyed by tone.
pub fn fallback_repair(text: &str, tone: ToneType) -> String {
    let mut body = canonicalize(text);

    if is_shouting(&body) {
        body = sentence_case(&body);
    }
    body = EMPHATIC_RUN.replace_all(&body, ".").into_owned();
    if tone == ToneType::Rhythm {
        body = collapse_repeats(&body);
    }
    for sub in SUBSTITUTIONS.iter().filter(|sub| sub.tone == tone) {
        body = sub.pattern.replace_all(&body, sub.replacement).into_owned();
    }
    body = SPACE_BEFORE_PUNCT
        .replace_all(&canonicalize(&body), "$1")
        .into_owned();
    let body = body.trim_start_matches([',', ';', ':', ' ']).trim();

    template_for(tone).replace("{text}", body).trim().to_string()
}

/// Accept a provider rewrite only if it is a plausible single message.
pub fn validate_provider_output(candidate: &str, max_chars: usize) -> Result<String, ProviderError> {
    let cleaned = canonicalize(candidate.trim().trim_matches('"'));
    if cleaned.is_empty() {
        return Err(ProviderError::Malformed("empty"));
    }
    if cleaned.chars().count() > max_chars.saturating_mul(2) {
        return Err(ProviderError::Malformed("too_long"));
    }
    if candidate.contains("```") {
        return Err(ProviderError::Malformed("code_block"));
    }
    Ok(cleaned)
}

fn is_shouting(text: &str) -> bool {
    let letters: Vec<char> = text.chars().filter(|ch| ch.is_ascii_alphabetic()).collect();
    if letters.len() < 4 {
        return false;
    }
    let upper = letters.iter().filter(|ch| ch.is_ascii_uppercase()).count();
    upper * 10 >= letters.len() * 6
}

fn sentence_case(text: &str) -> String {
    let lowered = text.to_lowercase();
    let mut chars = lowered.chars();
    let mut out = String::with_capacity(lowered.len());
    if let Some(first) = chars.next() {
        out.extend(first.to_uppercase());
    }
    out.extend(chars);
    // Standalone "i" stays capitalized.
    out.split(' ')
        .map(|word| if word == "i" { "I" } else { word })
        .collect::<Vec<_>>()
        .join(" ")
}

fn collapse_repeats(text: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    for word in text.split_whitespace() {
        let bare = word.trim_matches(|ch: char| !ch.is_alphanumeric());
        let repeated = kept.last().is_some_and(|prev| {
            let prev_bare = prev.trim_matches(|ch: char| !ch.is_alphanumeric());
            !bare.is_empty() && prev_bare.to_lowercase() == bare.to_lowercase()
        });
        if !repeated {
            kept.push(word);
        }
    }
    kept.join(" ")
}
