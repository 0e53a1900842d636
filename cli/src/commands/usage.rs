//! Offline operator commands on the data directory. None of these talk to the
//! API; they read the same files the service writes.

use std::path::{Path, PathBuf};

use chrono::Utc;
use continuum_core::error::{UsageError, UsageResult};
use continuum_core::heartbeat::{HeartbeatReason, HeartbeatStatus};
use continuum_core::log::{self, ScrubExport, UsageLog};
use continuum_core::signing::{SigningKey, Verification};
use continuum_core::usage::UsageMonth;
use serde_json::json;

use crate::util::{open_log, pretty, print_error, report_usage_error, require_key};

/// Seal a closed month and print the summary with its signature.
pub fn summary(data_dir: &Path, month: &str) -> i32 {
    let month: UsageMonth = match month.parse() {
        Ok(m) => m,
        Err(err) => return report_usage_error(&err),
    };
    let log = match open_log(data_dir) {
        Ok(log) => log,
        Err(code) => return code,
    };
    match log.generate_summary(month, Utc::now()) {
        Ok(sealed) => {
            println!(
                "{}",
                pretty(&json!({
                    "summary": sealed.summary,
                    "signature": sealed.signature,
                    "summary_path": sealed.summary_path,
                    "signature_path": sealed.signature_path,
                }))
            );
            0
        }
        Err(err) => report_usage_error(&err),
    }
}

/// Where the pair to verify comes from.
pub enum VerifyTarget {
    Month(String),
    Files { summary: PathBuf, signature: PathBuf },
}

/// Billing verification: prints VALID or INVALID. INVALID exits 1 so scripts
/// stop dependent reconciliation.
pub fn verify(data_dir: &Path, target: VerifyTarget) -> i32 {
    let key = match require_key() {
        Ok(key) => key,
        Err(code) => return code,
    };
    let (summary_path, signature_path) = match target {
        VerifyTarget::Files { summary, signature } => (summary, signature),
        VerifyTarget::Month(month) => match month.parse::<UsageMonth>() {
            Ok(month) => stored_pair(data_dir, month),
            Err(err) => return report_usage_error(&err),
        },
    };
    if !summary_path.exists() || !signature_path.exists() {
        return print_error(
            "not_found",
            &format!("no summary pair at {}", summary_path.display()),
            Some("Seal the month first with `continuum summary <YYYY-MM>`."),
            2,
        );
    }

    match verify_files(&summary_path, &signature_path, &key) {
        Ok(result) => {
            let output = json!({
                "result": result,
                "summary_path": summary_path,
                "signature_path": signature_path,
            });
            if result.is_valid() {
                println!("{}", pretty(&output));
                0
            } else {
                eprintln!("{}", pretty(&output));
                1
            }
        }
        Err(err) => report_usage_error(&err),
    }
}

pub fn verify_files(
    summary_path: &Path,
    signature_path: &Path,
    key: &SigningKey,
) -> UsageResult<Verification> {
    log::verify_pair(summary_path, signature_path, key)
}

fn stored_pair(data_dir: &Path, month: UsageMonth) -> (PathBuf, PathBuf) {
    let dir = data_dir.join(log::SUMMARIES_DIR).join(month.to_string());
    (dir.join(log::SUMMARY_FILE), dir.join(log::SIGNATURE_FILE))
}

/// Check the tamper-evident heartbeat. No events yet is not a failure.
pub fn heartbeat(data_dir: &Path) -> i32 {
    let log = match open_log(data_dir) {
        Ok(log) => log,
        Err(code) => return code,
    };
    let status = log.heartbeat_status();
    let code = heartbeat_exit_code(&status);
    if code == 0 {
        println!("{}", pretty(&status));
    } else {
        eprintln!("{}", pretty(&status));
    }
    code
}

fn heartbeat_exit_code(status: &HeartbeatStatus) -> i32 {
    match status.reason {
        HeartbeatReason::Ok | HeartbeatReason::NoEvents => 0,
        HeartbeatReason::SignatureMismatch => 1,
        HeartbeatReason::MissingSigningKey => 4,
    }
}

/// Content-free export of the newest events, to `out` or stdout.
pub fn export(data_dir: &Path, limit: usize, out: Option<&Path>) -> i32 {
    let log = match open_log(data_dir) {
        Ok(log) => log,
        Err(code) => return code,
    };
    match write_export(&log, limit, out) {
        Ok(export) => {
            if let Some(path) = out {
                println!(
                    "{}",
                    pretty(&json!({
                        "written": path,
                        "record_count": export.record_count,
                    }))
                );
            }
            0
        }
        Err(err) => report_usage_error(&err),
    }
}

fn write_export(log: &UsageLog, limit: usize, out: Option<&Path>) -> Result<ScrubExport, UsageError> {
    let export = log.export_scrub_log(limit, Utc::now())?;
    let body = serde_json::to_string_pretty(&export)?;
    match out {
        Some(path) => std::fs::write(path, body)?,
        None => println!("{body}"),
    }
    Ok(export)
}
