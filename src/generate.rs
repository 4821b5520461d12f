//! Generative model client.
//!
//! The console sends the assembled corpus context plus the user's query
//! to a hosted Gemini model and returns the model's analysis. The
//! [`Generator`] trait is the seam; [`GeminiClient`] talks to the REST
//! API:
//!
//! - `GET {base_url}/models` lists models, keeping those that support
//!   `generateContent`, flash models first.
//! - `POST {base_url}/{model}:generateContent` with
//!   `{"contents":[{"parts":[{"text": prompt}]}]}`.
//!
//! The key travels in the `x-goog-api-key` header, never in the URL, and
//! transport errors are stripped of their URL before they are surfaced.
//!
//! Retry strategy ([`generate_with_retry`]):
//! - HTTP 429 / `RESOURCE_EXHAUSTED` → wait a fixed backoff, retry
//! - invalid or unauthorised key → fail immediately
//! - anything else → fail immediately

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::config::GenerativeConfig;

/// Used when the model list cannot be fetched or comes back empty.
pub const FALLBACK_MODEL: &str = "models/gemini-1.5-flash-latest";

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("rate limited by the model provider: {0}")]
    RateLimited(String),
    #[error("API key rejected: {0}")]
    InvalidCredential(String),
    #[error("network error: {0}")]
    Network(reqwest::Error),
    #[error("model API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("no API key configured")]
    MissingApiKey,
    #[error("model returned no text")]
    EmptyResponse,
}

impl From<reqwest::Error> for GenerateError {
    fn from(e: reqwest::Error) -> Self {
        GenerateError::Network(e.without_url())
    }
}

impl GenerateError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GenerateError::RateLimited(_))
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Models usable for generation. Never empty: failures fall back to
    /// [`FALLBACK_MODEL`].
    async fn list_models(&self, api_key: &str) -> Vec<String>;

    async fn generate(&self, api_key: &str, model: &str, prompt: &str)
        -> Result<String, GenerateError>;
}

pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
}

impl GeminiClient {
    pub fn new(config: &GenerativeConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch_models(&self, api_key: &str) -> Result<Vec<String>, GenerateError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .header(API_KEY_HEADER, api_key)
            .query(&[("pageSize", "1000")])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(classify_failure(status.as_u16(), &body));
        }
        let json: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| GenerateError::Api {
                status: status.as_u16(),
                message: format!("invalid model list: {}", e),
            })?;
        Ok(parse_model_list(&json))
    }
}

#[async_trait]
impl Generator for GeminiClient {
    async fn list_models(&self, api_key: &str) -> Vec<String> {
        if api_key.trim().is_empty() {
            return vec![FALLBACK_MODEL.to_string()];
        }
        match self.fetch_models(api_key).await {
            Ok(models) if !models.is_empty() => models,
            Ok(_) => vec![FALLBACK_MODEL.to_string()],
            Err(e) => {
                tracing::warn!(error = %e, "listing models failed; using fallback model");
                vec![FALLBACK_MODEL.to_string()]
            }
        }
    }

    async fn generate(
        &self,
        api_key: &str,
        model: &str,
        prompt: &str,
    ) -> Result<String, GenerateError> {
        if api_key.trim().is_empty() {
            return Err(GenerateError::MissingApiKey);
        }

        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
        });

        let response = self
            .client
            .post(format!("{}/{}:generateContent", self.base_url, model_path(model)))
            .header(API_KEY_HEADER, api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(classify_failure(status.as_u16(), &text));
        }

        let json: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| GenerateError::Api {
                status: status.as_u16(),
                message: format!("invalid response: {}", e),
            })?;
        parse_generation(&json)
    }
}

/// `gemini-pro` and `models/gemini-pro` both address the same model.
fn model_path(model: &str) -> String {
    if model.starts_with("models/") || model.starts_with("tunedModels/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

/// Map a failed HTTP response onto an error kind.
fn classify_failure(status: u16, body: &str) -> GenerateError {
    let json: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let error = json.as_ref().and_then(|j| j.get("error"));
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .unwrap_or(body)
        .to_string();
    let api_status = error
        .and_then(|e| e.get("status"))
        .and_then(|s| s.as_str())
        .unwrap_or("");
    let key_invalid = body.contains("API_KEY_INVALID");

    match status {
        429 => GenerateError::RateLimited(message),
        _ if api_status == "RESOURCE_EXHAUSTED" => GenerateError::RateLimited(message),
        401 | 403 => GenerateError::InvalidCredential(message),
        400 if key_invalid => GenerateError::InvalidCredential(message),
        _ => GenerateError::Api { status, message },
    }
}

fn parse_model_list(json: &serde_json::Value) -> Vec<String> {
    let mut models: Vec<String> = json
        .get("models")
        .and_then(|m| m.as_array())
        .map(|models| {
            models
                .iter()
                .filter(|m| {
                    m.get("supportedGenerationMethods")
                        .and_then(|s| s.as_array())
                        .is_some_and(|methods| {
                            methods.iter().any(|x| x.as_str() == Some("generateContent"))
                        })
                })
                .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    // stable: flash models first, otherwise API order
    models.sort_by_key(|name| !name.contains("flash"));
    models
}

fn parse_generation(json: &serde_json::Value) -> Result<String, GenerateError> {
    let text: String = json
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(GenerateError::EmptyResponse);
    }
    Ok(text)
}

/// How often and how long to wait after a rate-limit failure.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &GenerativeConfig) -> Self {
        Self {
            retries: config.rate_limit_retries,
            backoff: Duration::from_secs(config.rate_limit_backoff_secs),
        }
    }
}

/// [`Generator::generate`], retrying rate-limit failures only.
pub async fn generate_with_retry(
    generator: &dyn Generator,
    policy: RetryPolicy,
    api_key: &str,
    model: &str,
    prompt: &str,
) -> Result<String, GenerateError> {
    let mut attempt = 0;
    loop {
        match generator.generate(api_key, model, prompt).await {
            Err(e) if e.is_retryable() && attempt < policy.retries => {
                attempt += 1;
                tracing::warn!(
                    model,
                    attempt,
                    backoff_secs = policy.backoff.as_secs_f32(),
                    "rate limited; retrying"
                );
                tokio::time::sleep(policy.backoff).await;
            }
            result => return result,
        }
    }
}

/// The prompt sent for grammatical analysis: retrieved context (may be
/// empty), then the instruction and the query.
pub fn analysis_prompt(context: &str, query: &str) -> String {
    format!(
        "{}\n\nUsing the Amis corpus entries above, give a detailed grammatical and \
         semantic analysis of the following sentence: {}",
        context, query
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn rate_limit_is_the_only_retryable_error() {
        assert!(GenerateError::RateLimited("quota".into()).is_retryable());
        assert!(!GenerateError::InvalidCredential("bad".into()).is_retryable());
        assert!(!GenerateError::MissingApiKey.is_retryable());
        assert!(!GenerateError::EmptyResponse.is_retryable());
    }

    #[test]
    fn classifies_http_failures() {
        let invalid = r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT","details":[{"reason":"API_KEY_INVALID"}]}}"#;
        assert!(matches!(
            classify_failure(400, invalid),
            GenerateError::InvalidCredential(m) if m == "API key not valid."
        ));
        assert!(matches!(
            classify_failure(429, "{}"),
            GenerateError::RateLimited(_)
        ));
        let exhausted = r#"{"error":{"code":400,"message":"quota","status":"RESOURCE_EXHAUSTED"}}"#;
        assert!(matches!(
            classify_failure(400, exhausted),
            GenerateError::RateLimited(_)
        ));
        assert!(matches!(
            classify_failure(403, "forbidden"),
            GenerateError::InvalidCredential(m) if m == "forbidden"
        ));
        assert!(matches!(
            classify_failure(500, "boom"),
            GenerateError::Api { status: 500, .. }
        ));
    }

    #[test]
    fn model_list_filters_and_puts_flash_first() {
        let json = serde_json::json!({
            "models": [
                { "name": "models/gemini-pro", "supportedGenerationMethods": ["generateContent"] },
                { "name": "models/embedding-001", "supportedGenerationMethods": ["embedContent"] },
                { "name": "models/gemini-1.5-flash", "supportedGenerationMethods": ["generateContent", "countTokens"] },
                { "name": "models/gemini-1.5-pro", "supportedGenerationMethods": ["generateContent"] }
            ]
        });
        assert_eq!(
            parse_model_list(&json),
            vec![
                "models/gemini-1.5-flash",
                "models/gemini-pro",
                "models/gemini-1.5-pro"
            ]
        );
        assert!(parse_model_list(&serde_json::json!({})).is_empty());
    }

    #[test]
    fn generation_text_is_joined_from_parts() {
        let json = serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "Nga'ay " }, { "text": "ho" }] } }]
        });
        assert_eq!(parse_generation(&json).unwrap(), "Nga'ay ho");
        assert!(matches!(
            parse_generation(&serde_json::json!({ "candidates": [] })),
            Err(GenerateError::EmptyResponse)
        ));
    }

    fn unreachable_client() -> GeminiClient {
        let config = GenerativeConfig {
            base_url: "http://127.0.0.1:1/v1beta".to_string(),
            timeout_secs: 5,
            ..GenerativeConfig::default()
        };
        GeminiClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn network_errors_do_not_leak_the_api_key() {
        let client = unreachable_client();
        let err = client
            .generate("SECRETKEY123", "gemini-pro", "O kaka ako")
            .await
            .unwrap_err();
        assert!(matches!(err, GenerateError::Network(_)));
        let text = err.to_string();
        assert!(!text.contains("SECRETKEY123"), "leaked: {}", text);
        assert!(!text.contains("127.0.0.1:1"), "url kept: {}", text);
    }

    #[tokio::test]
    async fn unreachable_model_list_falls_back() {
        let client = unreachable_client();
        assert_eq!(client.list_models("SECRETKEY123").await, vec![FALLBACK_MODEL]);
    }

    #[test]
    fn model_path_adds_prefix_once() {
        assert_eq!(model_path("gemini-pro"), "models/gemini-pro");
        assert_eq!(model_path("models/gemini-pro"), "models/gemini-pro");
    }

    /// Fails with a rate limit `failures` times, then succeeds.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Generator for Flaky {
        async fn list_models(&self, _: &str) -> Vec<String> {
            vec![FALLBACK_MODEL.to_string()]
        }
        async fn generate(&self, _: &str, _: &str, prompt: &str) -> Result<String, GenerateError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(GenerateError::RateLimited("slow down".into()))
            } else {
                Ok(format!("analysis of {}", prompt))
            }
        }
    }

    fn quick(retries: u32) -> RetryPolicy {
        RetryPolicy {
            retries,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retries_rate_limit_once_then_succeeds() {
        let flaky = Flaky {
            failures: 1,
            calls: AtomicU32::new(0),
        };
        let out = generate_with_retry(&flaky, quick(1), "key", FALLBACK_MODEL, "q")
            .await
            .unwrap();
        assert_eq!(out, "analysis of q");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_configured_retries() {
        let flaky = Flaky {
            failures: 5,
            calls: AtomicU32::new(0),
        };
        let err = generate_with_retry(&flaky, quick(1), "key", FALLBACK_MODEL, "q")
            .await
            .unwrap_err();
        assert!(matches!(err, GenerateError::RateLimited(_)));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn prompt_contains_context_and_query() {
        let p = analysis_prompt("[vocab] kaka : 哥哥 (n)", "O kaka ako");
        assert!(p.starts_with("[vocab] kaka"));
        assert!(p.ends_with("O kaka ako"));
    }
}
