//! JSON extractor that turns axum rejections into structured `AppError` responses.
//!
//! Rejection messages come from serde and describe the shape of the body
//! (missing/unknown fields, wrong types). They never quote submitted text.

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
};

use crate::error::AppError;

/// Drop-in replacement for `axum::Json<T>` in handler signatures.
pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(map_json_rejection(rejection)),
        }
    }
}

pub fn map_json_rejection(rejection: JsonRejection) -> AppError {
    let body_text = rejection.body_text();
    let field = extract_field_from_serde_message(&body_text).unwrap_or_else(|| "body".to_string());

    AppError::Validation {
        message: format!("Invalid request body: {}", strip_input_echo(&body_text)),
        field: Some(field),
        received: None,
        docs_hint: Some(
            "Check the request body against the endpoint's schema (GET /api-doc/openapi.json)."
                .to_string(),
        ),
    }
}

/// "missing field `text`" / "unknown field `foo`" → the field name.
fn extract_field_from_serde_message(msg: &str) -> Option<String> {
    for marker in ["missing field `", "unknown field `"] {
        if let Some(start) = msg.find(marker) {
            let after = &msg[start + marker.len()..];
            if let Some(end) = after.find('`') {
                return Some(after[..end].to_string());
            }
        }
    }
    None
}

/// serde quotes offending string values (`invalid type: string "..."`);
/// drop everything after the first quote so content never round-trips.
fn strip_input_echo(msg: &str) -> &str {
    match msg.find('"') {
        Some(idx) => msg[..idx].trim_end(),
        None => msg,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_missing_field_name() {
        let msg = "Failed to deserialize: missing field `text` at line 1 column 2";
        assert_eq!(extract_field_from_serde_message(msg), Some("text".to_string()));
    }

    #[test]
    fn extracts_unknown_field_name() {
        let msg = "unknown field `foo`, expected `text`";
        assert_eq!(extract_field_from_serde_message(msg), Some("foo".to_string()));
    }

    #[test]
    fn returns_none_for_generic_error() {
        assert_eq!(
            extract_field_from_serde_message("invalid type: string, expected u8"),
            None
        );
    }

    #[test]
    fn quoted_values_are_not_echoed() {
        let msg = r#"invalid type: string "I am so worried", expected u8"#;
        assert_eq!(strip_input_echo(msg), "invalid type: string");
    }
}
