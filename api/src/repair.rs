//! Timed repair engine and the HTTP generation provider.
//!
//! The provider call is the only suspension point of a request. It runs
//! under `tokio::time::timeout`; every failure lands on the deterministic
//! fallback in `continuum_core::repair`.

use std::sync::Arc;
use std::time::Duration;

use continuum_core::calibrate::CalibratedConfidence;
use continuum_core::config::GovernanceConfig;
use continuum_core::repair::{
    FallbackReason, ProviderError, ProviderFuture, RepairOutcome, RepairProvider, RepairRequest,
    RepairSource, validate_provider_output,
};
use continuum_core::scenario::Scenario;
use continuum_core::tone::ToneType;
use serde::Deserialize;

pub struct RepairEngine {
    provider: Option<Arc<dyn RepairProvider>>,
    timeout: Duration,
    min_confidence: f64,
    max_chars: usize,
}

impl RepairEngine {
    pub fn new(provider: Option<Arc<dyn RepairProvider>>, config: &GovernanceConfig) -> Self {
        Self {
            provider,
            timeout: Duration::from_millis(config.repair_timeout_ms),
            min_confidence: config.llm_min_confidence,
            max_chars: config.max_chars,
        }
    }

    pub fn provider_name(&self) -> Option<&'static str> {
        self.provider.as_ref().map(|p| p.name())
    }

    /// Never fails: a provider problem degrades to the fallback repair.
    pub async fn repair(
        &self,
        text: &str,
        tone: ToneType,
        scenario: Scenario,
        confidence: CalibratedConfidence,
    ) -> RepairOutcome {
        let Some(provider) = &self.provider else {
            return RepairOutcome::fallback(text, tone, FallbackReason::NoProvider);
        };
        if confidence.value() < self.min_confidence {
            return RepairOutcome::fallback(text, tone, FallbackReason::LowConfidence);
        }

        let request = RepairRequest {
            text,
            tone,
            scenario,
        };
        let result = match tokio::time::timeout(self.timeout, provider.repair(request)).await {
            Ok(result) => result.and_then(|candidate| validate_provider_output(&candidate, self.max_chars)),
            Err(_) => Err(ProviderError::Timeout(self.timeout.as_millis() as u64)),
        };

        match result {
            Ok(repaired) => RepairOutcome {
                text: repaired,
                source: RepairSource::Provider,
                fallback_reason: None,
            },
            Err(err) => {
                tracing::warn!(
                    provider = provider.name(),
                    tone = tone.as_str(),
                    error = %err,
                    "repair provider failed; using fallback"
                );
                RepairOutcome::fallback(text, tone, FallbackReason::from_error(&err))
            }
        }
    }
}

/// OpenAI-compatible chat-completions endpoint.
pub struct ChatCompletionsProvider {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
}

impl ChatCompletionsProvider {
    /// `LLM_API_URL` (required), `LLM_API_KEY`, `LLM_MODEL`.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("LLM_API_URL")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())?;
        let api_key = std::env::var("LLM_API_KEY")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let model = std::env::var("LLM_MODEL")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "gpt-4o-mini".to_string());
        Some(Self {
            client: reqwest::Client::new(),
            url,
            api_key,
            model,
        })
    }

    fn body(&self, request: &RepairRequest<'_>) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "max_tokens": 256,
            "messages": [
                {
                    "role": "system",
                    "content": format!(
                        "Rewrite the user's message so it reads calmer and clearer while keeping its meaning. \
                         Detected tone: {}. Context: {}. Reply with the rewritten message only.",
                        request.tone.as_str(),
                        request.scenario.as_str(),
                    ),
                },
                { "role": "user", "content": request.text },
            ],
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl RepairProvider for ChatCompletionsProvider {
    fn name(&self) -> &'static str {
        "chat_completions"
    }

    fn repair<'a>(&'a self, request: RepairRequest<'a>) -> ProviderFuture<'a> {
        Box::pin(async move {
            let mut call = self.client.post(&self.url).json(&self.body(&request));
            if let Some(key) = &self.api_key {
                call = call.bearer_auth(key);
            }
            let response = call
                .send()
                .await
                .map_err(|err| ProviderError::Transport(err.without_url().to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(ProviderError::Status(status.as_u16()));
            }
            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|_| ProviderError::Malformed("not_chat_json"))?;
            parsed
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .ok_or(ProviderError::Malformed("no_content"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use continuum_core::repair::fallback_repair;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Reply(&'static str),
        Fail,
        Stall,
    }

    struct StubProvider {
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl StubProvider {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl RepairProvider for StubProvider {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn repair<'a>(&'a self, _request: RepairRequest<'a>) -> ProviderFuture<'a> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                match self.behavior {
                    Behavior::Reply(text) => Ok(text.to_string()),
                    Behavior::Fail => Err(ProviderError::Status(502)),
                    Behavior::Stall => {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Ok("too late".to_string())
                    }
                }
            })
        }
    }

    fn engine(provider: Option<Arc<StubProvider>>) -> RepairEngine {
        let config = GovernanceConfig {
            repair_timeout_ms: 50,
            ..GovernanceConfig::default()
        };
        RepairEngine::new(provider.map(|p| p as Arc<dyn RepairProvider>), &config)
    }

    const TEXT: &str = "I can't take this anymore, please help";

    fn high() -> CalibratedConfidence {
        CalibratedConfidence::new(0.9)
    }

    #[tokio::test]
    async fn provider_success_is_used() {
        let stub = StubProvider::new(Behavior::Reply("I'm struggling and could use support."));
        let outcome = engine(Some(stub.clone()))
            .repair(TEXT, ToneType::Anxious, Scenario::Support, high())
            .await;
        assert_eq!(outcome.source, RepairSource::Provider);
        assert!(outcome.llm_used());
        assert_eq!(outcome.text, "I'm struggling and could use support.");
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_falls_back_deterministically() {
        let outcome = engine(Some(StubProvider::new(Behavior::Stall)))
            .repair(TEXT, ToneType::Anxious, Scenario::Support, high())
            .await;
        assert_eq!(outcome.source, RepairSource::Fallback);
        assert_eq!(outcome.fallback_reason, Some(FallbackReason::Timeout));
        assert_eq!(outcome.text, fallback_repair(TEXT, ToneType::Anxious));
    }

    #[tokio::test]
    async fn provider_error_and_malformed_output_fall_back() {
        let failed = engine(Some(StubProvider::new(Behavior::Fail)))
            .repair(TEXT, ToneType::Anxious, Scenario::Support, high())
            .await;
        assert_eq!(failed.fallback_reason, Some(FallbackReason::ProviderError));

        let empty = engine(Some(StubProvider::new(Behavior::Reply("   "))))
            .repair(TEXT, ToneType::Anxious, Scenario::Support, high())
            .await;
        assert_eq!(empty.fallback_reason, Some(FallbackReason::Malformed));
        assert_eq!(failed.text, empty.text);
    }

    #[tokio::test]
    async fn low_confidence_skips_the_provider() {
        let stub = StubProvider::new(Behavior::Reply("unused"));
        let outcome = engine(Some(stub.clone()))
            .repair(
                TEXT,
                ToneType::Anxious,
                Scenario::Support,
                CalibratedConfidence::new(0.56),
            )
            .await;
        assert_eq!(outcome.fallback_reason, Some(FallbackReason::LowConfidence));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_provider_uses_fallback() {
        let outcome = engine(None)
            .repair(TEXT, ToneType::Sharp, Scenario::General, high())
            .await;
        assert_eq!(outcome.fallback_reason, Some(FallbackReason::NoProvider));
        assert!(!outcome.llm_used());
    }
}
