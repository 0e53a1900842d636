use serde_json::json;

use crate::util::{api_request, print_error};

/// Submit one utterance. `-` reads it from stdin.
pub async fn run(api_url: &str, text: &str) -> i32 {
    let text = if text == "-" {
        match std::io::read_to_string(std::io::stdin()) {
            Ok(buf) => buf,
            Err(e) => {
                return print_error("cli_error", &format!("Failed to read stdin: {e}"), None, 4);
            }
        }
    } else {
        text.to_string()
    };

    api_request(
        api_url,
        reqwest::Method::POST,
        "/api/v1/analyze",
        Some(json!({ "text": text })),
    )
    .await
}

pub async fn feedback(
    api_url: &str,
    log_id: &str,
    accuracy: u8,
    helpful: u8,
    accepted: bool,
) -> i32 {
    api_request(
        api_url,
        reqwest::Method::POST,
        "/api/v1/feedback",
        Some(json!({
            "log_id": log_id,
            "accuracy": accuracy,
            "helpful": helpful,
            "accepted": accepted
        })),
    )
    .await
}
