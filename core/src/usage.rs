//! Content-free usage events and the monthly summary derived from them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::UsageError;
use crate::normalize::RejectionReason;
use crate::scenario::Scenario;
use crate::signing::SIGNATURE_ALGORITHM;
use crate::tone::{DecisionState, Mode, ToneType};

pub const SUMMARY_SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Analysis,
    Rejection,
    Feedback,
}

impl EventType {
    pub const ALL: [EventType; 3] = [EventType::Analysis, EventType::Rejection, EventType::Feedback];

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Analysis => "analysis",
            EventType::Rejection => "rejection",
            EventType::Feedback => "feedback",
        }
    }
}

/// User rating of an earlier decision, correlated by its event id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FeedbackRecord {
    pub target_event_id: Uuid,
    /// 1..=5
    pub accuracy: u8,
    /// 1..=5
    pub helpful: u8,
    pub accepted: bool,
}

/// One append-only log record. Holds categorical labels, scalars and a
/// one-way fingerprint only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UsageEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_state: Option<DecisionState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone_type: Option<ToneType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<Scenario>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<RejectionReason>,
    pub latency_ms: u64,
    pub llm_used: bool,
    pub out_of_scope: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<FeedbackRecord>,
}

/// A billing period, `YYYY-MM`, in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UsageMonth {
    year: i32,
    month: u32,
}

impl UsageMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        ((1..=12).contains(&month) && (1..=9999).contains(&year)).then_some(Self { year, month })
    }

    pub fn of(timestamp: DateTime<Utc>) -> Self {
        Self {
            year: timestamp.year(),
            month: timestamp.month(),
        }
    }

    pub fn previous(self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    pub fn contains(self, timestamp: DateTime<Utc>) -> bool {
        Self::of(timestamp) == self
    }

    /// A period is closed once the current UTC month is strictly later.
    pub fn is_closed_at(self, now: DateTime<Utc>) -> bool {
        self < Self::of(now)
    }
}

impl fmt::Display for UsageMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for UsageMonth {
    type Err = UsageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || UsageError::InvalidMonth(value.chars().take(16).collect());
        let (year, month) = value.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        if !year.bytes().chain(month.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Self::new(year, month).ok_or_else(invalid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SummaryKind {
    /// Sealed at period rollover or on demand for a closed period.
    Final,
    /// Partial snapshot written on shutdown; does not seal the period.
    Checkpoint,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UsageCounts {
    pub analysis_count: u64,
    pub feedback_count: u64,
    pub rejection_count: u64,
    pub total_events: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DecisionBreakdown {
    #[serde(rename = "ALLOW")]
    pub allow: u64,
    #[serde(rename = "GUIDE")]
    pub guide: u64,
    #[serde(rename = "BLOCK")]
    pub block: u64,
}

impl DecisionBreakdown {
    pub fn record(&mut self, state: DecisionState) {
        match state {
            DecisionState::Allow => self.allow += 1,
            DecisionState::Guide => self.guide += 1,
            DecisionState::Block => self.block += 1,
        }
    }

    pub fn get(&self, state: DecisionState) -> u64 {
        match state {
            DecisionState::Allow => self.allow,
            DecisionState::Guide => self.guide,
            DecisionState::Block => self.block,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ModeBreakdown {
    pub repair: u64,
    pub suggest: u64,
    #[serde(rename = "no-op")]
    pub no_op: u64,
}

impl ModeBreakdown {
    pub fn record(&mut self, mode: Mode) {
        match mode {
            Mode::Repair => self.repair += 1,
            Mode::Suggest => self.suggest += 1,
            Mode::NoOp => self.no_op += 1,
        }
    }
}

/// Derived, recomputable view of one period. Serialized once into canonical
/// bytes which are then signed and never re-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UsageSummary {
    pub schema_version: String,
    pub month: String,
    pub kind: SummaryKind,
    pub generated_at_utc: String,
    pub counts: UsageCounts,
    pub decisions: DecisionBreakdown,
    pub modes: ModeBreakdown,
    #[schema(value_type = BTreeMap<String, u64>)]
    pub tones: BTreeMap<ToneType, u64>,
    pub llm_used_count: u64,
    pub out_of_scope_count: u64,
    pub content_free: bool,
    pub signature_algorithm: String,
}

impl UsageSummary {
    /// Aggregate every event of `month`; events from other periods are ignored.
    pub fn aggregate<'a, I>(
        month: UsageMonth,
        events: I,
        generated_at: DateTime<Utc>,
        kind: SummaryKind,
    ) -> Self
    where
        I: IntoIterator<Item = &'a UsageEvent>,
    {
        let mut counts = UsageCounts::default();
        let mut decisions = DecisionBreakdown::default();
        let mut modes = ModeBreakdown::default();
        let mut tones = BTreeMap::new();
        let mut llm_used_count = 0;
        let mut out_of_scope_count = 0;

        for event in events.into_iter().filter(|e| month.contains(e.timestamp)) {
            counts.total_events += 1;
            match event.event_type {
                EventType::Analysis => counts.analysis_count += 1,
                EventType::Feedback => counts.feedback_count += 1,
                EventType::Rejection => counts.rejection_count += 1,
            }
            if let Some(state) = event.decision_state {
                decisions.record(state);
            }
            if let Some(mode) = event.mode {
                modes.record(mode);
            }
            if let Some(tone) = event.tone_type {
                *tones.entry(tone).or_insert(0) += 1;
            }
            llm_used_count += u64::from(event.llm_used);
            out_of_scope_count += u64::from(event.out_of_scope);
        }

        Self {
            schema_version: SUMMARY_SCHEMA_VERSION.to_string(),
            month: month.to_string(),
            kind,
            generated_at_utc: generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            counts,
            decisions,
            modes,
            tones,
            llm_used_count,
            out_of_scope_count,
            content_free: true,
            signature_algorithm: SIGNATURE_ALGORITHM.to_string(),
        }
    }

    /// Compact JSON with fixed field order and sorted maps.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
    }

    fn analysis(ts: DateTime<Utc>, state: DecisionState, mode: Mode, tone: ToneType) -> UsageEvent {
        UsageEvent {
            event_id: Uuid::now_v7(),
            timestamp: ts,
            event_type: EventType::Analysis,
            decision_state: Some(state),
            mode: Some(mode),
            tone_type: Some(tone),
            scenario: Some(Scenario::General),
            rejection_reason: None,
            latency_ms: 3,
            llm_used: mode == Mode::Repair,
            out_of_scope: state == DecisionState::Block,
            fingerprint: Some("a".repeat(64)),
            feedback: None,
        }
    }

    #[test]
    fn month_parsing_is_strict() {
        let month: UsageMonth = "2026-03".parse().unwrap();
        assert_eq!(month.to_string(), "2026-03");
        for bad in ["2026-3", "2026-13", "2026-00", "26-03", "2026/03", "2026-0a", "", "../x"] {
            assert!(bad.parse::<UsageMonth>().is_err(), "{bad}");
        }
    }

    #[test]
    fn month_arithmetic_and_closure() {
        let jan: UsageMonth = "2026-01".parse().unwrap();
        assert_eq!(jan.previous().to_string(), "2025-12");
        assert!(jan.is_closed_at(at(2026, 2, 1)));
        assert!(!jan.is_closed_at(at(2026, 1, 31)));
        assert!(!jan.is_closed_at(at(2025, 12, 1)));
    }

    #[test]
    fn aggregate_counts_only_the_requested_month() {
        let month: UsageMonth = "2026-01".parse().unwrap();
        let mut events = vec![
            analysis(at(2026, 1, 2), DecisionState::Guide, Mode::Repair, ToneType::Anxious),
            analysis(at(2026, 1, 3), DecisionState::Allow, Mode::NoOp, ToneType::Unknown),
            analysis(at(2026, 1, 4), DecisionState::Block, Mode::NoOp, ToneType::Anxious),
            analysis(at(2026, 2, 1), DecisionState::Guide, Mode::Suggest, ToneType::Cold),
        ];
        let mut feedback = analysis(at(2026, 1, 5), DecisionState::Allow, Mode::NoOp, ToneType::Cold);
        feedback.event_type = EventType::Feedback;
        feedback.decision_state = None;
        feedback.mode = None;
        feedback.tone_type = None;
        events.push(feedback);

        let summary = UsageSummary::aggregate(month, &events, at(2026, 2, 1), SummaryKind::Final);
        assert_eq!(summary.counts.total_events, 4);
        assert_eq!(summary.counts.analysis_count, 3);
        assert_eq!(summary.counts.feedback_count, 1);
        assert_eq!(summary.decisions.get(DecisionState::Guide), 1);
        assert_eq!(summary.decisions.get(DecisionState::Block), 1);
        assert_eq!(summary.modes.repair, 1);
        assert_eq!(summary.tones.get(&ToneType::Anxious), Some(&2));
        assert_eq!(summary.out_of_scope_count, 1);
        assert!(summary.content_free);
    }

    #[test]
    fn canonical_bytes_are_stable_and_content_free() {
        let month: UsageMonth = "2026-01".parse().unwrap();
        let events = vec![analysis(
            at(2026, 1, 2),
            DecisionState::Guide,
            Mode::Repair,
            ToneType::Anxious,
        )];
        let summary = UsageSummary::aggregate(month, &events, at(2026, 2, 1), SummaryKind::Final);
        let first = summary.canonical_bytes().unwrap();
        assert_eq!(summary.canonical_bytes().unwrap(), first);
        let text = String::from_utf8(first).unwrap();
        assert!(text.starts_with(r#"{"schema_version":"1.0","month":"2026-01","kind":"final""#));
        assert!(text.contains(r#""decisions":{"ALLOW":0,"GUIDE":1,"BLOCK":0}"#));
        assert!(!text.contains("fingerprint"));
        let back: UsageSummary = serde_json::from_str(&text).unwrap();
        assert_eq!(back, summary);
    }

    #[test]
    fn events_omit_absent_fields() {
        let event = UsageEvent {
            event_id: Uuid::nil(),
            timestamp: at(2026, 1, 1),
            event_type: EventType::Rejection,
            decision_state: None,
            mode: None,
            tone_type: None,
            scenario: None,
            rejection_reason: Some(RejectionReason::TooShort),
            latency_ms: 0,
            llm_used: false,
            out_of_scope: false,
            fingerprint: None,
            feedback: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("tone_type").is_none());
        assert_eq!(json["rejection_reason"], "too_short");
        assert_eq!(json["event_type"], "rejection");
    }
}
