//! Tamper-evident heartbeat kept next to the usage log.
//!
//! After each append the log rewrites `usage_meta.json` with the running
//! totals and an HMAC over `total|counter|last_event_id|last_event_ts`.
//! Editing the counters, or truncating the log and rewriting the meta
//! without the key, breaks the signature.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::signing::{self, SigningKey, Verification};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HeartbeatMeta {
    pub total_events: u64,
    pub heartbeat_counter: u64,
    pub last_event_id: Option<Uuid>,
    pub last_event_ts: Option<DateTime<Utc>>,
    pub current_month: Option<String>,
    pub last_heartbeat_sig: Option<String>,
}

impl HeartbeatMeta {
    /// Canonical signed payload. Absent id/timestamp encode as empty fields.
    pub fn payload(&self) -> String {
        let id = self.last_event_id.map(|id| id.to_string()).unwrap_or_default();
        let ts = self
            .last_event_ts
            .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Micros, true))
            .unwrap_or_default();
        format!(
            "{}|{}|{}|{}",
            self.total_events, self.heartbeat_counter, id, ts
        )
    }

    /// Advance the counters for one appended event and re-sign.
    /// `current_month` only ever moves forward.
    pub fn advance(&mut self, event_id: Uuid, timestamp: DateTime<Utc>, key: Option<&SigningKey>) {
        self.total_events += 1;
        self.heartbeat_counter += 1;
        self.last_event_id = Some(event_id);
        self.last_event_ts = Some(timestamp);
        let month = timestamp.format("%Y-%m").to_string();
        if self.current_month.as_deref().is_none_or(|current| month.as_str() > current) {
            self.current_month = Some(month);
        }
        self.last_heartbeat_sig = key.map(|key| signing::sign(self.payload().as_bytes(), key));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatReason {
    Ok,
    NoEvents,
    MissingSigningKey,
    SignatureMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct HeartbeatStatus {
    pub ok: bool,
    pub reason: HeartbeatReason,
    pub total_events: u64,
    pub heartbeat_counter: u64,
    pub last_event_ts: Option<DateTime<Utc>>,
}

pub fn verify_heartbeat(meta: Option<&HeartbeatMeta>, key: Option<&SigningKey>) -> HeartbeatStatus {
    let status = |ok, reason, meta: Option<&HeartbeatMeta>| HeartbeatStatus {
        ok,
        reason,
        total_events: meta.map_or(0, |m| m.total_events),
        heartbeat_counter: meta.map_or(0, |m| m.heartbeat_counter),
        last_event_ts: meta.and_then(|m| m.last_event_ts),
    };

    let Some(meta) = meta.filter(|m| m.total_events > 0) else {
        return status(false, HeartbeatReason::NoEvents, meta);
    };
    let Some(key) = key else {
        return status(false, HeartbeatReason::MissingSigningKey, Some(meta));
    };
    let signature = meta.last_heartbeat_sig.as_deref().unwrap_or_default();
    match signing::verify(meta.payload().as_bytes(), signature, key) {
        Verification::Valid => status(true, HeartbeatReason::Ok, Some(meta)),
        Verification::Invalid => status(false, HeartbeatReason::SignatureMismatch, Some(meta)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key() -> SigningKey {
        SigningKey::new("heartbeat-key").unwrap()
    }

    fn advanced(n: u64) -> HeartbeatMeta {
        let mut meta = HeartbeatMeta::default();
        let ts = Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap();
        for _ in 0..n {
            meta.advance(Uuid::now_v7(), ts, Some(&key()));
        }
        meta
    }

    #[test]
    fn fresh_log_reports_no_events() {
        let status = verify_heartbeat(None, Some(&key()));
        assert_eq!(status.reason, HeartbeatReason::NoEvents);
        assert!(!status.ok);
        let empty = HeartbeatMeta::default();
        assert_eq!(
            verify_heartbeat(Some(&empty), Some(&key())).reason,
            HeartbeatReason::NoEvents
        );
    }

    #[test]
    fn signed_heartbeat_verifies() {
        let meta = advanced(3);
        assert_eq!(meta.current_month.as_deref(), Some("2026-04"));
        let status = verify_heartbeat(Some(&meta), Some(&key()));
        assert!(status.ok);
        assert_eq!(status.reason, HeartbeatReason::Ok);
        assert_eq!(status.total_events, 3);
    }

    #[test]
    fn current_month_never_moves_back() {
        let mut meta = advanced(1);
        let march = Utc.with_ymd_and_hms(2026, 3, 31, 23, 59, 59).unwrap();
        meta.advance(Uuid::now_v7(), march, Some(&key()));
        assert_eq!(meta.current_month.as_deref(), Some("2026-04"));
        assert_eq!(meta.total_events, 2);
        assert!(verify_heartbeat(Some(&meta), Some(&key())).ok);
    }

    #[test]
    fn edited_counter_is_a_mismatch() {
        let mut meta = advanced(3);
        meta.total_events = 2;
        assert_eq!(
            verify_heartbeat(Some(&meta), Some(&key())).reason,
            HeartbeatReason::SignatureMismatch
        );
    }

    #[test]
    fn missing_key_is_reported() {
        let meta = advanced(1);
        assert_eq!(
            verify_heartbeat(Some(&meta), None).reason,
            HeartbeatReason::MissingSigningKey
        );
    }

    #[test]
    fn unsigned_meta_is_a_mismatch() {
        let mut meta = HeartbeatMeta::default();
        meta.advance(Uuid::now_v7(), Utc::now(), None);
        assert!(meta.last_heartbeat_sig.is_none());
        assert_eq!(
            verify_heartbeat(Some(&meta), Some(&key())).reason,
            HeartbeatReason::SignatureMismatch
        );
    }
}
