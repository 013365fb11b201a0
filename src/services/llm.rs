use crate::core::error::{GatewayError, StageName};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    async fn chat(&self, model: &str, system: &str, user: &str) -> GatewayResult<String>;
}

// --- Config ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    pub provider: String, // "openai", "groq", "gemini" or "ollama"
    #[serde(default = "default_retry_count")]
    pub retry_count: usize,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    pub openai: Option<OpenAIConfig>,
    pub groq: Option<OpenAIConfig>,
    pub gemini: Option<GeminiConfig>,
    pub ollama: Option<OllamaConfig>,
    #[serde(default)]
    pub models: StageModels,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIConfig {
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
}

/// Per-stage model overrides. Unset stages use the provider's model.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StageModels {
    pub outline: Option<String>,
    pub characters: Option<String>,
    pub plot: Option<String>,
    pub consistency: Option<String>,
    pub splitter: Option<String>,
    pub expansion: Option<String>,
    pub dialogue: Option<String>,
    pub translation: Option<String>,
}

fn default_retry_count() -> usize {
    3
}
fn default_retry_delay() -> u64 {
    10
}
fn default_timeout() -> u64 {
    300
}

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

impl LlmConfig {
    pub fn default_model(&self) -> Result<String> {
        let model = match self.provider.as_str() {
            "openai" => self.openai.as_ref().map(|c| c.model.clone()),
            "groq" => self.groq.as_ref().map(|c| c.model.clone()),
            "gemini" => self.gemini.as_ref().map(|c| c.model.clone()),
            "ollama" => self.ollama.as_ref().map(|c| c.model.clone()),
            _ => return Err(anyhow!("Unknown LLM provider: {}", self.provider)),
        };
        model.with_context(|| format!("{} config missing", self.provider))
    }

    pub fn model_for(&self, stage: StageName) -> Result<String> {
        let m = &self.models;
        let chosen = match stage {
            StageName::Outline | StageName::Refine => &m.outline,
            StageName::Characters => &m.characters,
            StageName::Plot => &m.plot,
            StageName::Consistency => &m.consistency,
            StageName::Split => &m.splitter,
            StageName::Expansion => &m.expansion,
            StageName::Dialogue => &m.dialogue,
            StageName::Translation => &m.translation,
        };
        match chosen {
            Some(model) => Ok(model.clone()),
            None => self.default_model(),
        }
    }
}

/// Config value wins; an empty value falls back to the environment.
pub fn resolve_api_key(configured: &str, env_var: &str) -> Result<String> {
    if !configured.trim().is_empty() {
        return Ok(configured.to_string());
    }
    std::env::var(env_var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .with_context(|| format!("No API key configured. Set it in config.yml or {}", env_var))
}

pub fn create_llm(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds))
        .build()?;

    let inner: Box<dyn LlmClient> = match config.provider.as_str() {
        "openai" => {
            let cfg = config.openai.as_ref().context("OpenAI config missing")?;
            let key = resolve_api_key(&cfg.api_key, "OPENAI_API_KEY")?;
            Box::new(OpenAIClient::new(http, &key, cfg.base_url.as_deref().unwrap_or(OPENAI_BASE_URL)))
        }
        "groq" => {
            let cfg = config.groq.as_ref().context("Groq config missing")?;
            let key = resolve_api_key(&cfg.api_key, "GROQ_API_KEY")?;
            Box::new(OpenAIClient::new(http, &key, cfg.base_url.as_deref().unwrap_or(GROQ_BASE_URL)))
        }
        "gemini" => {
            let cfg = config.gemini.as_ref().context("Gemini config missing")?;
            let key = resolve_api_key(&cfg.api_key, "GEMINI_API_KEY")?;
            Box::new(GeminiClient::new(http, &key))
        }
        "ollama" => {
            let cfg = config.ollama.as_ref().context("Ollama config missing")?;
            Box::new(OllamaClient::new(http, &cfg.base_url))
        }
        _ => return Err(anyhow!("Unknown LLM provider: {}", config.provider)),
    };

    Ok(Arc::new(RetryingClient::new(
        inner,
        config.retry_count,
        Duration::from_secs(config.retry_delay_seconds),
    )))
}

fn classify_status(provider: &str, status: reqwest::StatusCode, body: &str) -> GatewayError {
    let message = format!("{} API error ({}): {}", provider, status, body);
    if status.as_u16() == 408 || status.as_u16() == 429 || status.is_server_error() {
        GatewayError::Transient(message)
    } else {
        GatewayError::Fatal(message)
    }
}

// --- Retry ---

/// Retries transient failures with a fixed delay; fatal errors pass through.
#[derive(Debug)]
pub struct RetryingClient {
    inner: Box<dyn LlmClient>,
    retry_count: usize,
    delay: Duration,
}

impl RetryingClient {
    pub fn new(inner: Box<dyn LlmClient>, retry_count: usize, delay: Duration) -> Self {
        Self {
            inner,
            retry_count,
            delay,
        }
    }
}

#[async_trait]
impl LlmClient for RetryingClient {
    async fn chat(&self, model: &str, system: &str, user: &str) -> GatewayResult<String> {
        let max_attempts = self.retry_count + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.inner.chat(model, system, user).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!(
                        "LLM call failed (attempt {}/{}), retrying in {:?}: {}",
                        attempt, max_attempts, self.delay, e
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// --- Gemini ---
#[derive(Debug)]
struct GeminiClient {
    api_key: String,
    client: reqwest::Client,
}

impl GeminiClient {
    fn new(client: reqwest::Client, api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            client,
        }
    }
}

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Deserialize)]
struct GeminiPartResponse {
    text: String,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

fn gemini_text(result: GeminiResponse) -> GatewayResult<String> {
    if let Some(err) = result.error {
        return Err(GatewayError::Fatal(format!("Gemini API returned error: {}", err.message)));
    }

    let first = result
        .candidates
        .and_then(|c| c.into_iter().next())
        .ok_or_else(|| GatewayError::Fatal("Gemini response has no candidates".to_string()))?;

    if let Some(part) = first.content.and_then(|c| c.parts.into_iter().next()) {
        return Ok(part.text);
    }

    let reason = first.finish_reason.as_deref().unwrap_or("UNKNOWN");
    Err(GatewayError::Fatal(format!(
        "Gemini response empty. Finish reason: {}",
        reason
    )))
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn chat(&self, model: &str, system: &str, user: &str) -> GatewayResult<String> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            model, self.api_key
        );

        let request_body = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart { text: user.to_string() }],
            }],
            system_instruction: Some(GeminiSystemInstruction {
                parts: vec![GeminiPart { text: system.to_string() }],
            }),
        };

        let resp = self.client.post(&url).json(&request_body).send().await?;

        let status = resp.status();
        let response_text = resp.text().await?;
        if !status.is_success() {
            return Err(classify_status("Gemini", status, &response_text));
        }

        let result: GeminiResponse = serde_json::from_str(&response_text).map_err(|e| {
            GatewayError::Fatal(format!(
                "Failed to parse Gemini response: {}. Body: {}",
                e, response_text
            ))
        })?;
        gemini_text(result)
    }
}

// --- Ollama ---
#[derive(Debug)]
struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaClient {
    fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

fn messages(system: &str, user: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage { role: "system".to_string(), content: system.to_string() },
        ChatMessage { role: "user".to_string(), content: user.to_string() },
    ]
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: OllamaMessageResponse,
}

#[derive(Deserialize)]
struct OllamaMessageResponse {
    content: String,
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn chat(&self, model: &str, system: &str, user: &str) -> GatewayResult<String> {
        let url = format!("{}/api/chat", self.base_url);

        let request_body = OllamaRequest {
            model: model.to_string(),
            messages: messages(system, user),
            stream: false,
        };

        let resp = self.client.post(&url).json(&request_body).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let error_text = resp.text().await?;
            return Err(classify_status("Ollama", status, &error_text));
        }

        let result: OllamaResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::Fatal(format!("Failed to parse Ollama response: {}", e)))?;
        Ok(result.message.content)
    }
}

// --- OpenAI-compatible (OpenAI, Groq) ---

#[derive(Debug)]
struct OpenAIClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIClient {
    fn new(client: reqwest::Client, api_key: &str, base_url: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessageResponse,
}

#[derive(Deserialize)]
struct OpenAIMessageResponse {
    content: Option<String>,
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn chat(&self, model: &str, system: &str, user: &str) -> GatewayResult<String> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!("POST {} (model {})", url, model);

        let request_body = OpenAIRequest {
            model: model.to_string(),
            messages: messages(system, user),
        };

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let error_text = resp.text().await?;
            return Err(classify_status("OpenAI", status, &error_text));
        }

        let result: OpenAIResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::Fatal(format!("Failed to parse OpenAI response: {}", e)))?;
        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GatewayError::Fatal("OpenAI response empty or missing content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_gemini_response_parsing_safety_block() {
        let json = r#"{
            "candidates": [
                {
                    "finishReason": "SAFETY",
                    "index": 0
                }
            ]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        let err = gemini_text(result).unwrap_err();
        assert!(matches!(err, GatewayError::Fatal(ref m) if m.contains("SAFETY")));
    }

    #[test]
    fn test_gemini_response_parsing_success() {
        let json = r#"{
            "candidates": [
                {
                    "content": {
                        "parts": [
                            { "text": "Hello world" }
                        ],
                        "role": "model"
                    },
                    "finishReason": "STOP",
                    "index": 0
                }
            ]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(gemini_text(result).unwrap(), "Hello world");
    }

    #[test]
    fn test_openai_response_parsing_success() {
        let json = r#"{
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Hello there, how may I assist you today?"
                },
                "finish_reason": "stop"
            }]
        }"#;

        let result: OpenAIResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            result.choices[0].message.content.as_deref(),
            Some("Hello there, how may I assist you today?")
        );
    }

    #[test]
    fn test_status_classification() {
        use reqwest::StatusCode;
        assert!(classify_status("x", StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_status("x", StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(!classify_status("x", StatusCode::UNAUTHORIZED, "").is_transient());
        assert!(!classify_status("x", StatusCode::BAD_REQUEST, "").is_transient());
    }

    #[test]
    fn test_model_for_stage_override() {
        let config: LlmConfig = serde_json::from_str(
            r#"{
                "provider": "groq",
                "groq": { "model": "llama3-70b-8192" },
                "models": { "translation": "gpt-4o-mini" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.model_for(StageName::Outline).unwrap(), "llama3-70b-8192");
        assert_eq!(config.model_for(StageName::Translation).unwrap(), "gpt-4o-mini");
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        let config: LlmConfig = serde_json::from_str(r#"{ "provider": "nope" }"#).unwrap();
        assert!(config.default_model().is_err());
        assert!(create_llm(&config).is_err());
    }

    #[test]
    fn test_resolve_api_key_prefers_config() {
        assert_eq!(resolve_api_key("abc", "STORYLOOM_TEST_UNSET_KEY").unwrap(), "abc");
        assert!(resolve_api_key("  ", "STORYLOOM_TEST_UNSET_KEY").is_err());
    }

    #[derive(Debug)]
    struct FlakyClient {
        failures: Mutex<Vec<GatewayError>>,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl LlmClient for FlakyClient {
        async fn chat(&self, _: &str, _: &str, _: &str) -> GatewayResult<String> {
            *self.calls.lock().unwrap() += 1;
            match self.failures.lock().unwrap().pop() {
                Some(e) => Err(e),
                None => Ok("ok".to_string()),
            }
        }
    }

    #[tokio::test]
    async fn test_retrying_client_retries_transient_only() {
        let flaky = FlakyClient {
            failures: Mutex::new(vec![
                GatewayError::Transient("503".into()),
                GatewayError::Transient("429".into()),
            ]),
            calls: Mutex::new(0),
        };
        let client = RetryingClient::new(Box::new(flaky), 3, Duration::from_millis(1));
        assert_eq!(client.chat("m", "s", "u").await.unwrap(), "ok");

        let fatal = FlakyClient {
            failures: Mutex::new(vec![GatewayError::Fatal("401".into())]),
            calls: Mutex::new(0),
        };
        let client = RetryingClient::new(Box::new(fatal), 3, Duration::from_millis(1));
        assert!(matches!(
            client.chat("m", "s", "u").await,
            Err(GatewayError::Fatal(_))
        ));
    }

    #[tokio::test]
    async fn test_retrying_client_gives_up_after_budget() {
        let flaky = FlakyClient {
            failures: Mutex::new(vec![
                GatewayError::Transient("a".into()),
                GatewayError::Transient("b".into()),
                GatewayError::Transient("c".into()),
            ]),
            calls: Mutex::new(0),
        };
        let client = RetryingClient::new(Box::new(flaky), 1, Duration::from_millis(1));
        assert!(matches!(
            client.chat("m", "s", "u").await,
            Err(GatewayError::Transient(_))
        ));
    }
}
