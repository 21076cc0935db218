use super::{LanguageModel, TextStream};
use crate::config::Config;
use crate::error::CollaboratorError;
use crate::util::truncate_str;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Rate limit retry configuration
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000; // 2 seconds
const BACKOFF_MULTIPLIER: u64 = 2; // Exponential backoff

/// OpenAI-compatible chat-completions client (OpenRouter by default).
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Error payload some providers return with a 200 status.
#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

/// One parsed server-sent-events line.
#[derive(Debug, PartialEq)]
enum SseLine {
    Content(String),
    Done,
    Skip,
}

/// Create a configured HTTP client; `timeout_secs` bounds every request.
pub(crate) fn create_http_client(timeout_secs: u64) -> Result<reqwest::Client, CollaboratorError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| CollaboratorError::Configuration(format!("Failed to create HTTP client: {}", e)))
}

/// Extract retry-after hint from a rate-limit response body (if present)
fn parse_retry_after(text: &str) -> Option<u64> {
    let text_lower = text.to_lowercase();
    let pos = text_lower.find("retry")?;
    let after_retry = &text_lower[pos..];
    for word in after_retry.split_whitespace().skip(1).take(5) {
        if let Ok(secs) = word.trim_matches(|c: char| !c.is_numeric()).parse::<u64>() {
            if secs > 0 && secs < 300 {
                return Some(secs);
            }
        }
    }
    None
}

pub(crate) fn backoff_secs(retry_count: u32) -> u64 {
    let factor = BACKOFF_MULTIPLIER.pow(retry_count.saturating_sub(1));
    let secs = INITIAL_BACKOFF_MS.saturating_mul(factor) / 1000;
    secs.max(1)
}

fn map_transport_error(err: reqwest::Error) -> CollaboratorError {
    if err.is_timeout() {
        CollaboratorError::Provider("Language model request timed out".to_string())
    } else if err.is_connect() {
        CollaboratorError::Provider(
            "Could not connect to the language model provider. Check your network.".to_string(),
        )
    } else {
        CollaboratorError::Provider(err.to_string())
    }
}

fn status_error(status: reqwest::StatusCode, text: &str, retries: u32) -> CollaboratorError {
    match status.as_u16() {
        401 | 403 => CollaboratorError::Configuration(
            "Invalid API key. Run 'incident --setup' to update it.".to_string(),
        ),
        429 => CollaboratorError::Provider(format!(
            "Rate limited after {} retries. Try again in a few minutes.",
            retries
        )),
        500..=599 => CollaboratorError::Provider(format!(
            "Provider server error ({}). The service may be temporarily unavailable.",
            status
        )),
        _ => CollaboratorError::Provider(format!(
            "API error {}: {}",
            status,
            truncate_str(text, 200)
        )),
    }
}

fn parse_completion(text: &str) -> Result<String, CollaboratorError> {
    let parsed: ChatResponse = serde_json::from_str(text).map_err(|e| {
        CollaboratorError::Provider(format!(
            "Failed to parse completion response: {} ({})",
            e,
            truncate_str(text, 200)
        ))
    })?;

    if let Some(error) = parsed.error {
        return Err(CollaboratorError::Provider(format!(
            "Upstream provider error: {}",
            error.message
        )));
    }

    Ok(parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default())
}

fn parse_sse_line(line: &str) -> Result<SseLine, CollaboratorError> {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    // Keep-alive comments and malformed frames carry no text.
    let Ok(chunk) = serde_json::from_str::<StreamChunk>(data) else {
        return Ok(SseLine::Skip);
    };
    if let Some(error) = chunk.error {
        return Err(CollaboratorError::Provider(format!(
            "Stream error: {}",
            error.message
        )));
    }
    let content = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
        .unwrap_or_default();
    if content.is_empty() {
        Ok(SseLine::Skip)
    } else {
        Ok(SseLine::Content(content))
    }
}

/// Text deltas from a server-sent-events body, ending at `[DONE]` or EOF.
fn sse_text(
    response: reqwest::Response,
) -> impl Stream<Item = Result<String, CollaboratorError>> + Send + 'static {
    async_stream::try_stream! {
        let mut bytes = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut done = false;

        while !done {
            let Some(chunk) = bytes.next().await else {
                break;
            };
            let chunk = chunk.map_err(|e| {
                CollaboratorError::Provider(format!("Stream read failed: {}", e))
            })?;
            buffer.extend_from_slice(&chunk);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                match parse_sse_line(&line)? {
                    SseLine::Content(text) => yield text,
                    SseLine::Done => {
                        done = true;
                        break;
                    }
                    SseLine::Skip => {}
                }
            }
        }
    }
}

impl ChatCompletionsClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        url: impl Into<String>,
        max_tokens: u32,
        timeout_secs: u64,
    ) -> Result<Self, CollaboratorError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(CollaboratorError::Configuration(
                "Language model API key is empty".to_string(),
            ));
        }
        Ok(Self {
            http: create_http_client(timeout_secs)?,
            url: url.into(),
            api_key,
            model: model.into(),
            max_tokens,
        })
    }

    /// Build from settings and stored credentials. Fails when no key is
    /// configured.
    pub fn from_config(config: &Config) -> Result<Self, CollaboratorError> {
        let api_key = config.llm_api_key().ok_or_else(|| {
            CollaboratorError::Configuration(
                "No language model API key configured. Run 'incident --setup' or set OPENROUTER_API_KEY."
                    .to_string(),
            )
        })?;
        Self::new(
            api_key,
            config.model.clone(),
            config.api_base_url.clone(),
            config.max_tokens,
            config.request_timeout_secs,
        )
    }

    fn build_request(&self, prompt: &str, system_prompt: Option<&str>, stream: bool) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system_prompt.filter(|s| !s.trim().is_empty()) {
            messages.push(Message {
                role: "system".to_string(),
                content: system.to_string(),
            });
        }
        messages.push(Message {
            role: "user".to_string(),
            content: prompt.to_string(),
        });
        ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: self.max_tokens,
            stream,
        }
    }

    /// Send with automatic retry and exponential backoff on rate limits.
    /// Returns the first successful response.
    async fn send_with_retry(
        &self,
        request: &ChatRequest,
    ) -> Result<reqwest::Response, CollaboratorError> {
        let mut retry_count = 0;

        loop {
            let response = self
                .http
                .post(&self.url)
                .header("Content-Type", "application/json")
                .header("X-Title", "incident-responder")
                .bearer_auth(&self.api_key)
                .json(request)
                .send()
                .await
                .map_err(map_transport_error)?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let text = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 && retry_count < MAX_RETRIES {
                retry_count += 1;
                let retry_after = parse_retry_after(&text).unwrap_or_else(|| backoff_secs(retry_count));
                tracing::warn!(
                    retry_after,
                    attempt = retry_count,
                    max = MAX_RETRIES,
                    "language model rate limited, retrying"
                );
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                continue;
            }

            return Err(status_error(status, &text, retry_count));
        }
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionsClient {
    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> Result<String, CollaboratorError> {
        let request = self.build_request(prompt, system_prompt, false);
        let response = self.send_with_retry(&request).await?;
        let text = response.text().await.map_err(map_transport_error)?;
        let content = parse_completion(&text)?;
        tracing::debug!(model = %self.model, chars = content.len(), "completion received");
        Ok(content)
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> Result<TextStream, CollaboratorError> {
        let request = self.build_request(prompt, system_prompt, true);
        let response = self.send_with_retry(&request).await?;

        Ok(Box::pin(sse_text(response)))
    }
}
