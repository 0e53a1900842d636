//! Content scrubbing between the pipeline and persistence.
//!
//! The scrubber never sees an [`Utterance`]: callers fingerprint the text up
//! front and hand over a [`RequestContext`] of derived labels and scalars.

use std::fmt;

use chrono::{DateTime, Utc};
use rand::RngCore;
use uuid::Uuid;

use crate::normalize::{RejectionReason, Utterance};
use crate::scenario::Scenario;
use crate::signing::{hmac_hex, is_signature_hex};
use crate::tone::{DecisionState, Mode, ToneType};
use crate::usage::{EventType, FeedbackRecord, UsageEvent};

/// Keyed one-way hash of normalized text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log correlation.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct Fingerprinter {
    salt: Vec<u8>,
    persistent: bool,
}

impl Fingerprinter {
    pub fn new(salt: impl AsRef<[u8]>) -> Self {
        Self {
            salt: salt.as_ref().to_vec(),
            persistent: true,
        }
    }

    /// Per-process salt: fingerprints stay one-way but do not correlate
    /// across restarts.
    pub fn ephemeral() -> Self {
        let mut salt = vec![0_u8; 32];
        rand::thread_rng().fill_bytes(&mut salt);
        Self {
            salt,
            persistent: false,
        }
    }

    /// `LOG_SALT`, or an ephemeral salt with a warning when unset.
    pub fn from_env() -> Self {
        match std::env::var("LOG_SALT")
            .ok()
            .filter(|salt| !salt.trim().is_empty())
        {
            Some(salt) => Self::new(salt.trim()),
            None => {
                tracing::warn!(
                    "LOG_SALT not set; using a per-process fingerprint salt (no cross-restart correlation)"
                );
                Self::ephemeral()
            }
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn fingerprint(&self, utterance: &Utterance) -> Fingerprint {
        Fingerprint(hmac_hex(&self.salt, utterance.text().as_bytes()))
    }
}

impl fmt::Debug for Fingerprinter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fingerprinter")
            .field("persistent", &self.persistent)
            .finish_non_exhaustive()
    }
}

/// Everything the recorder may learn about one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub event_type: EventType,
    pub decision_state: Option<DecisionState>,
    pub mode: Option<Mode>,
    pub tone_type: Option<ToneType>,
    pub scenario: Option<Scenario>,
    pub rejection_reason: Option<RejectionReason>,
    pub latency_ms: u64,
    pub llm_used: bool,
    pub out_of_scope: bool,
    pub fingerprint: Option<Fingerprint>,
    pub feedback: Option<FeedbackRecord>,
}

impl RequestContext {
    pub fn rejection(reason: RejectionReason, latency_ms: u64) -> Self {
        Self {
            event_type: EventType::Rejection,
            decision_state: None,
            mode: None,
            tone_type: None,
            scenario: None,
            rejection_reason: Some(reason),
            latency_ms,
            llm_used: false,
            out_of_scope: false,
            fingerprint: None,
            feedback: None,
        }
    }

    pub fn feedback(record: FeedbackRecord) -> Self {
        Self {
            event_type: EventType::Feedback,
            decision_state: None,
            mode: None,
            tone_type: None,
            scenario: None,
            rejection_reason: None,
            latency_ms: 0,
            llm_used: false,
            out_of_scope: false,
            fingerprint: None,
            feedback: Some(record),
        }
    }
}

pub fn scrub(ctx: RequestContext) -> UsageEvent {
    scrub_at(ctx, Uuid::now_v7(), Utc::now())
}

pub fn scrub_at(ctx: RequestContext, event_id: Uuid, timestamp: DateTime<Utc>) -> UsageEvent {
    UsageEvent {
        event_id,
        timestamp,
        event_type: ctx.event_type,
        decision_state: ctx.decision_state,
        mode: ctx.mode,
        tone_type: ctx.tone_type,
        scenario: ctx.scenario,
        rejection_reason: ctx.rejection_reason,
        latency_ms: ctx.latency_ms,
        llm_used: ctx.llm_used,
        out_of_scope: ctx.out_of_scope,
        fingerprint: ctx.fingerprint.map(|fp| fp.0),
        feedback: ctx.feedback,
    }
}

/// Structural check that an event carries nothing text-derived besides a
/// well-formed fingerprint: every string in its serialized form must be the
/// fingerprint, an id, the timestamp or a categorical label.
pub fn privacy_guard(event: &UsageEvent) -> bool {
    if let Some(fp) = &event.fingerprint {
        if !is_signature_hex(fp) {
            return false;
        }
    }
    let Ok(value) = serde_json::to_value(event) else {
        return false;
    };
    let mut strings = Vec::new();
    collect_strings(&value, &mut strings);
    strings.iter().all(|s| is_permitted_string(event, s))
}

fn collect_strings<'a>(value: &'a serde_json::Value, out: &mut Vec<&'a str>) {
    match value {
        serde_json::Value::String(s) => out.push(s),
        serde_json::Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        serde_json::Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

fn is_permitted_string(event: &UsageEvent, value: &str) -> bool {
    if event.fingerprint.as_deref() == Some(value) {
        return true;
    }
    if Uuid::parse_str(value).is_ok() || DateTime::parse_from_rfc3339(value).is_ok() {
        return true;
    }
    ToneType::ALL.iter().any(|t| t.as_str() == value)
        || Mode::ALL.iter().any(|m| m.as_str() == value)
        || DecisionState::ALL.iter().any(|d| d.as_str() == value)
        || Scenario::ALL.iter().any(|s| s.as_str() == value)
        || RejectionReason::ALL.iter().any(|r| r.as_str() == value)
        || EventType::ALL.iter().any(|e| e.as_str() == value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::LengthGate;

    fn utterance(text: &str) -> Utterance {
        LengthGate {
            min_chars: 1,
            max_chars: 1000,
        }
        .normalize(text)
        .unwrap()
    }

    fn analysis_ctx(fp: Fingerprint) -> RequestContext {
        RequestContext {
            event_type: EventType::Analysis,
            decision_state: Some(DecisionState::Guide),
            mode: Some(Mode::Repair),
            tone_type: Some(ToneType::Anxious),
            scenario: Some(Scenario::Support),
            rejection_reason: None,
            latency_ms: 12,
            llm_used: false,
            out_of_scope: false,
            fingerprint: Some(fp),
            feedback: None,
        }
    }

    #[test]
    fn fingerprint_is_keyed_and_deterministic() {
        let u = utterance("I can't take this anymore, please help");
        let a = Fingerprinter::new("salt-a");
        let b = Fingerprinter::new("salt-b");
        assert_eq!(a.fingerprint(&u), a.fingerprint(&u));
        assert_ne!(a.fingerprint(&u), b.fingerprint(&u));
        assert_eq!(a.fingerprint(&u).as_str().len(), 64);
        assert_eq!(a.fingerprint(&u).short().len(), 12);
    }

    #[test]
    fn ephemeral_salts_differ() {
        let u = utterance("hello");
        let first = Fingerprinter::ephemeral();
        assert!(!first.is_persistent());
        assert_ne!(
            first.fingerprint(&u),
            Fingerprinter::ephemeral().fingerprint(&u)
        );
    }

    #[test]
    fn scrubbed_event_contains_no_raw_text() {
        let text = "I can't take this anymore, please help";
        let u = utterance(text);
        let fp = Fingerprinter::new("salt").fingerprint(&u);
        let event = scrub(analysis_ctx(fp));
        let json = serde_json::to_string(&event).unwrap();
        for word in ["take", "anymore", "please", "help"] {
            assert!(!json.contains(word), "{word} leaked into {json}");
        }
        assert!(privacy_guard(&event));
    }

    #[test]
    fn guard_rejects_malformed_fingerprints() {
        let u = utterance("hello");
        let fp = Fingerprinter::new("salt").fingerprint(&u);
        let mut event = scrub(analysis_ctx(fp));
        event.fingerprint = Some("hello".into());
        assert!(!privacy_guard(&event));
    }

    #[test]
    fn rejection_and_feedback_events_pass_the_guard() {
        assert!(privacy_guard(&scrub(RequestContext::rejection(
            RejectionReason::TooLong,
            1
        ))));
        let record = FeedbackRecord {
            target_event_id: Uuid::now_v7(),
            accuracy: 4,
            helpful: 5,
            accepted: true,
        };
        let event = scrub(RequestContext::feedback(record));
        assert_eq!(event.event_type, EventType::Feedback);
        assert!(privacy_guard(&event));
    }
}
