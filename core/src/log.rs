//! File-backed append-only usage log with signed period summaries.
//!
//! Layout under the data directory:
//!
//! ```text
//! usage_events.jsonl                     one UsageEvent per line
//! usage_meta.json                        heartbeat state, replaced via rename
//! summaries/<YYYY-MM>/summary.json|.sig  sealed period, immutable
//! checkpoints/<YYYY-MM>/<stamp>.json|.sig
//! ```
//!
//! Appends are serialized by one mutex so every line is written whole, and
//! an append whose line or heartbeat fails to land is truncated back out.
//! Event timestamps never move behind the open period: a late event for a
//! period that has rolled over or been sealed is carried forward into it.
//! Sealing claims the period directory with an exclusive `create_dir`, so
//! two generations for the same month cannot both succeed.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{UsageError, UsageResult};
use crate::heartbeat::{HeartbeatMeta, HeartbeatStatus, verify_heartbeat};
use crate::signing::{self, SigningKey, Verification};
use crate::tone::{DecisionState, Mode, ToneType};
use crate::usage::{EventType, SummaryKind, UsageEvent, UsageMonth, UsageSummary};

pub const EVENTS_FILE: &str = "usage_events.jsonl";
pub const META_FILE: &str = "usage_meta.json";
pub const SUMMARIES_DIR: &str = "summaries";
pub const CHECKPOINTS_DIR: &str = "checkpoints";
pub const SUMMARY_FILE: &str = "summary.json";
pub const SIGNATURE_FILE: &str = "summary.sig";
/// Upper bound on records in one scrub-log export.
pub const EXPORT_LIMIT: usize = 5000;

/// A summary together with its signature and where both were written.
#[derive(Debug, Clone)]
pub struct SealedSummary {
    pub summary: UsageSummary,
    pub signature: String,
    pub summary_path: PathBuf,
    pub signature_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppendOutcome {
    /// Previous period sealed as a side effect of this append.
    pub sealed: Option<UsageMonth>,
    /// The event was stamped for this closed period and was recorded in the
    /// open one instead.
    pub carried_from: Option<UsageMonth>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ScrubRecord {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub decision_state: Option<DecisionState>,
    pub mode: Option<Mode>,
    pub tone_type: Option<ToneType>,
    pub latency_ms: u64,
    pub llm_used: bool,
    pub out_of_scope: bool,
    pub fingerprint: Option<String>,
}

impl From<&UsageEvent> for ScrubRecord {
    fn from(event: &UsageEvent) -> Self {
        Self {
            event_id: event.event_id,
            timestamp: event.timestamp,
            event_type: event.event_type,
            decision_state: event.decision_state,
            mode: event.mode,
            tone_type: event.tone_type,
            latency_ms: event.latency_ms,
            llm_used: event.llm_used,
            out_of_scope: event.out_of_scope,
            fingerprint: event.fingerprint.clone(),
        }
    }
}

/// Content-free export of the newest events, newest first.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ScrubExport {
    pub generated_at_utc: String,
    pub content_free: bool,
    pub record_count: usize,
    pub records: Vec<ScrubRecord>,
}

pub struct UsageLog {
    root: PathBuf,
    key: Option<SigningKey>,
    meta: Mutex<HeartbeatMeta>,
}

impl UsageLog {
    pub fn open(root: impl Into<PathBuf>, key: Option<SigningKey>) -> UsageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let meta = match fs::read(root.join(META_FILE)) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => HeartbeatMeta::default(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            root,
            key,
            meta: Mutex::new(meta),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn signing_key_present(&self) -> bool {
        self.key.is_some()
    }

    pub fn meta(&self) -> HeartbeatMeta {
        self.lock().clone()
    }

    pub fn heartbeat_status(&self) -> HeartbeatStatus {
        let meta = self.meta();
        verify_heartbeat(Some(&meta), self.key.as_ref())
    }

    /// Append one record, refresh the heartbeat, and seal the previous
    /// period when this is the first event of a new month.
    pub fn append(&self, event: &UsageEvent) -> UsageResult<AppendOutcome> {
        let mut meta = self.lock();
        let previous_month = meta
            .current_month
            .as_deref()
            .and_then(|month| month.parse::<UsageMonth>().ok());

        let mut outcome = AppendOutcome::default();
        let carried;
        let event = match self.carry_forward(&meta, previous_month, event) {
            Some(timestamp) => {
                let stamped = UsageMonth::of(event.timestamp);
                tracing::warn!(
                    event_id = %event.event_id,
                    month = %stamped,
                    carried_to = %UsageMonth::of(timestamp),
                    "late usage event carried into the open period"
                );
                outcome.carried_from = Some(stamped);
                carried = UsageEvent {
                    timestamp,
                    ..event.clone()
                };
                &carried
            }
            None => event,
        };

        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(self.root.join(EVENTS_FILE))?;
        let prev_len = file.metadata()?.len();
        if !ends_with_newline(&mut file, prev_len)? {
            // Isolate a torn tail left by a crash so it cannot swallow this record.
            line.insert(0, b'\n');
        }

        let mut next = meta.clone();
        next.advance(event.event_id, event.timestamp, self.key.as_ref());
        let written = file
            .write_all(&line)
            .and_then(|()| file.flush())
            .map_err(UsageError::from)
            .and_then(|()| self.write_meta(&next));
        if let Err(err) = written {
            if let Err(truncate) = file.set_len(prev_len) {
                tracing::error!(
                    event_id = %event.event_id,
                    error = %truncate,
                    "failed to roll back partial usage append"
                );
            }
            return Err(err);
        }
        *meta = next;

        let event_month = UsageMonth::of(event.timestamp);
        if let Some(previous) = previous_month.filter(|prev| *prev < event_month) {
            match self.seal_locked(previous, event.timestamp) {
                Ok(_) => {
                    tracing::info!(month = %previous, "usage period sealed at rollover");
                    outcome.sealed = Some(previous);
                }
                Err(UsageError::AlreadySealed(_)) => {}
                Err(err) => {
                    tracing::warn!(month = %previous, error = %err, "rollover sealing skipped");
                }
            }
        }
        Ok(outcome)
    }

    /// New timestamp for an event whose period is already behind the log:
    /// earlier than the current month, or sealed.
    fn carry_forward(
        &self,
        meta: &HeartbeatMeta,
        current: Option<UsageMonth>,
        event: &UsageEvent,
    ) -> Option<DateTime<Utc>> {
        let month = UsageMonth::of(event.timestamp);
        if current.is_some_and(|current| month < current) {
            return meta.last_event_ts.filter(|ts| *ts > event.timestamp);
        }
        let sealed = self.root.join(SUMMARIES_DIR).join(month.to_string()).exists();
        sealed.then(Utc::now)
    }

    pub fn read_events(&self) -> UsageResult<Vec<UsageEvent>> {
        let _guard = self.lock();
        self.read_events_locked()
    }

    /// `generate_usage_summary(month)`: aggregate, sign and persist the
    /// (summary.json, summary.sig) pair for a closed period, exactly once.
    pub fn generate_summary(&self, month: UsageMonth, now: DateTime<Utc>) -> UsageResult<SealedSummary> {
        let _guard = self.lock();
        self.seal_locked(month, now)
    }

    /// Signed partial summary of the open period. Never seals it.
    pub fn write_checkpoint(&self, now: DateTime<Utc>) -> UsageResult<SealedSummary> {
        let key = self.key.as_ref().ok_or(UsageError::MissingSigningKey)?;
        let _guard = self.lock();
        let month = UsageMonth::of(now);
        let events = self.read_events_locked()?;
        let summary = UsageSummary::aggregate(month, &events, now, SummaryKind::Checkpoint);

        let dir = self.root.join(CHECKPOINTS_DIR).join(month.to_string());
        fs::create_dir_all(&dir)?;
        let stamp = now.format("%Y%m%dT%H%M%S%.3fZ").to_string();
        write_pair(
            summary,
            key,
            dir.join(format!("{stamp}.json")),
            dir.join(format!("{stamp}.sig")),
        )
    }

    pub fn summary_paths(&self, month: UsageMonth) -> (PathBuf, PathBuf) {
        let dir = self.root.join(SUMMARIES_DIR).join(month.to_string());
        (dir.join(SUMMARY_FILE), dir.join(SIGNATURE_FILE))
    }

    /// Verify the stored pair for `month`. `Ok(None)` if nothing was sealed.
    pub fn verify_summary(&self, month: UsageMonth) -> UsageResult<Option<Verification>> {
        let key = self.key.as_ref().ok_or(UsageError::MissingSigningKey)?;
        let (summary_path, signature_path) = self.summary_paths(month);
        if !summary_path.exists() {
            return Ok(None);
        }
        verify_pair(&summary_path, &signature_path, key).map(Some)
    }

    pub fn export_scrub_log(&self, limit: usize, now: DateTime<Utc>) -> UsageResult<ScrubExport> {
        let events = self.read_events()?;
        let records: Vec<ScrubRecord> = events
            .iter()
            .rev()
            .take(limit.min(EXPORT_LIMIT))
            .map(ScrubRecord::from)
            .collect();
        Ok(ScrubExport {
            generated_at_utc: now.to_rfc3339_opts(SecondsFormat::Secs, true),
            content_free: true,
            record_count: records.len(),
            records,
        })
    }

    fn seal_locked(&self, month: UsageMonth, now: DateTime<Utc>) -> UsageResult<SealedSummary> {
        let key = self.key.as_ref().ok_or(UsageError::MissingSigningKey)?;
        if !month.is_closed_at(now) {
            return Err(UsageError::PeriodOpen(month.to_string()));
        }

        let parent = self.root.join(SUMMARIES_DIR);
        fs::create_dir_all(&parent)?;
        let dir = parent.join(month.to_string());
        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(UsageError::AlreadySealed(month.to_string()));
            }
            Err(err) => return Err(err.into()),
        }

        let sealed = self.read_events_locked().and_then(|events| {
            let summary = UsageSummary::aggregate(month, &events, now, SummaryKind::Final);
            write_pair(summary, key, dir.join(SUMMARY_FILE), dir.join(SIGNATURE_FILE))
        });
        if let Err(err) = &sealed {
            // Release the claim so the period can be generated again.
            if let Err(release) = fs::remove_dir_all(&dir) {
                tracing::error!(
                    month = %month,
                    error = %err,
                    release_error = %release,
                    "sealing failed and the period claim could not be released"
                );
            }
        }
        sealed
    }

    fn read_events_locked(&self) -> UsageResult<Vec<UsageEvent>> {
        let file = match fs::File::open(self.root.join(EVENTS_FILE)) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut events = Vec::new();
        let mut seen = HashSet::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: UsageEvent = match serde_json::from_str(&line) {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!(line = index + 1, error = %err, "skipping unreadable usage record");
                    continue;
                }
            };
            if !seen.insert(event.event_id) {
                tracing::warn!(line = index + 1, event_id = %event.event_id, "skipping duplicate usage record");
                continue;
            }
            events.push(event);
        }
        Ok(events)
    }

    fn write_meta(&self, meta: &HeartbeatMeta) -> UsageResult<()> {
        let tmp = self.root.join(format!("{META_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_vec_pretty(meta)?)?;
        fs::rename(&tmp, self.root.join(META_FILE))?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, HeartbeatMeta> {
        self.meta.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn ends_with_newline(file: &mut File, len: u64) -> io::Result<bool> {
    if len == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn write_pair(
    summary: UsageSummary,
    key: &SigningKey,
    summary_path: PathBuf,
    signature_path: PathBuf,
) -> UsageResult<SealedSummary> {
    let bytes = summary.canonical_bytes()?;
    let signature = signing::sign(&bytes, key);
    fs::write(&summary_path, &bytes)?;
    fs::write(&signature_path, signature.as_bytes())?;
    Ok(SealedSummary {
        summary,
        signature,
        summary_path,
        signature_path,
    })
}

/// Billing verification utility: (summary file, signature file, key) -> VALID | INVALID.
/// The files are compared exactly as stored.
pub fn verify_pair(summary_path: &Path, signature_path: &Path, key: &SigningKey) -> UsageResult<Verification> {
    let bytes = fs::read(summary_path)?;
    let signature = fs::read(signature_path)?;
    let Ok(signature) = String::from_utf8(signature) else {
        return Ok(Verification::Invalid);
    };
    Ok(signing::verify(&bytes, &signature, key))
}
