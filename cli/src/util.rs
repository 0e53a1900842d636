use std::path::Path;

use continuum_core::error::UsageError;
use continuum_core::log::UsageLog;
use continuum_core::signing::SigningKey;
use serde::Serialize;
use serde_json::json;

pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

/// Print a structured error to stderr and return the given exit code.
pub fn print_error(error: &str, message: &str, docs_hint: Option<&str>, code: i32) -> i32 {
    let mut err = json!({
        "error": error,
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    eprintln!("{}", pretty(&err));
    code
}

pub fn pretty<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"raw_error\": \"{e}\"}}"))
}

/// Exit codes for offline commands:
/// 0=success, 1=refused or INVALID, 2=I/O failure, 4=usage/configuration error
pub fn usage_exit_code(err: &UsageError) -> i32 {
    match err {
        UsageError::AlreadySealed(_) | UsageError::PeriodOpen(_) => 1,
        UsageError::InvalidMonth(_) | UsageError::MissingSigningKey => 4,
        UsageError::Io(_) | UsageError::Serde(_) => 2,
    }
}

pub fn report_usage_error(err: &UsageError) -> i32 {
    let (code, hint) = match err {
        UsageError::MissingSigningKey => (
            "missing_signing_key",
            Some("Set USAGE_SIGNING_KEY (or LOG_SALT) to the key the service signs with."),
        ),
        UsageError::InvalidMonth(_) => ("invalid_month", Some("Months are YYYY-MM, e.g. 2025-01.")),
        UsageError::AlreadySealed(_) => ("already_sealed", None),
        UsageError::PeriodOpen(_) => (
            "period_open",
            Some("Only closed months can be sealed; use the shutdown checkpoint for partial data."),
        ),
        UsageError::Io(_) | UsageError::Serde(_) => ("io_error", None),
    };
    print_error(code, &err.to_string(), hint, usage_exit_code(err))
}

/// Open the usage log under `data_dir` with the signing key from the environment.
pub fn open_log(data_dir: &Path) -> Result<UsageLog, i32> {
    UsageLog::open(data_dir, SigningKey::from_env()).map_err(|err| report_usage_error(&err))
}

pub fn require_key() -> Result<SigningKey, i32> {
    SigningKey::from_env().ok_or_else(|| report_usage_error(&UsageError::MissingSigningKey))
}

/// Execute an API request, print the response, exit with structured code.
///
/// Exit codes: 0=success (2xx), 1=client error (4xx), 2=server error (5xx),
///             3=connection error, 4=usage error
pub async fn api_request(
    api_url: &str,
    method: reqwest::Method,
    path: &str,
    body: Option<serde_json::Value>,
) -> i32 {
    let url = match reqwest::Url::parse(&format!("{api_url}{path}")) {
        Ok(u) => u,
        Err(e) => {
            return print_error(
                "cli_error",
                &format!("Invalid URL: {api_url}{path}: {e}"),
                None,
                4,
            );
        }
    };

    let mut req = client().request(method, url);
    if let Some(b) = body {
        req = req.json(&b);
    }

    let resp = match req.send().await {
        Ok(r) => r,
        Err(e) => {
            return print_error(
                "connection_error",
                &format!("{e}"),
                Some("Is the API server running? Check CONTINUUM_API_URL."),
                3,
            );
        }
    };

    let status = resp.status().as_u16();
    let exit_code = match status {
        200..=299 => 0,
        400..=499 => 1,
        _ => 2,
    };

    let resp_body: serde_json::Value = match resp.json().await {
        Ok(v) => v,
        Err(e) => json!({"raw_error": format!("Failed to parse response as JSON: {e}")}),
    };

    if exit_code == 0 {
        println!("{}", pretty(&resp_body));
    } else {
        eprintln!("{}", pretty(&resp_body));
    }

    exit_code
}
