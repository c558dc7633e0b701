//! Language-model capability and its providers.
//!
//! Every provider takes one fully rendered prompt string; no provider-side
//! templating is used. Two modes:
//!
//! - [`LanguageModel::complete`] returns the whole answer.
//! - [`LanguageModel::complete_stream`] returns a stream of text fragments
//!   as the provider produces them.
//!
//! | Provider | Endpoint | Streaming wire format |
//! |----------|----------|-----------------------|
//! | `ollama` | `POST {url}/api/generate` | newline-delimited JSON |
//! | `openai` | `POST {url}/v1/chat/completions` | server-sent events |
//! | `disabled` | none | none |
//!
//! Calls are not retried here. Any failure is returned to the caller.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use serde_json::Value;

use crate::config::LlmConfig;

/// A stream of generated text fragments.
pub type TextStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String>;

    async fn complete_stream(&self, prompt: &str) -> Result<TextStream>;
}

pub fn create_language_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "ollama" => Ok(Arc::new(OllamaModel::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIModel::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

// ============ Disabled ============

pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        bail!("Language model provider is disabled")
    }

    async fn complete_stream(&self, _prompt: &str) -> Result<TextStream> {
        bail!("Language model provider is disabled")
    }
}

// ============ Ollama ============

pub struct OllamaModel {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: Option<f32>,
}

impl OllamaModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    async fn generate(&self, prompt: &str, stream: bool) -> Result<reqwest::Response> {
        let mut body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": stream,
        });
        if let Some(t) = self.temperature {
            body["options"] = serde_json::json!({ "temperature": t });
        }
        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Ollama connection error (is Ollama running at {}?)", self.url))?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body_text);
        }
        Ok(response)
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let json: Value = self.generate(prompt, false).await?.json().await?;
        if let Some(err) = json.get("error").and_then(Value::as_str) {
            bail!("Ollama error: {}", err);
        }
        json.get("response")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Invalid Ollama response: missing response field"))
    }

    async fn complete_stream(&self, prompt: &str) -> Result<TextStream> {
        let response = self.generate(prompt, true).await?;
        Ok(fragments(response.bytes_stream(), parse_ollama_line))
    }
}

/// One NDJSON line of `/api/generate` streaming output.
fn parse_ollama_line(line: &str) -> Result<Option<String>> {
    if line.is_empty() {
        return Ok(None);
    }
    let json: Value = serde_json::from_str(line).context("Invalid Ollama stream line")?;
    if let Some(err) = json.get("error").and_then(Value::as_str) {
        bail!("Ollama error: {}", err);
    }
    Ok(json
        .get("response")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string))
}

// ============ OpenAI ============

pub struct OpenAIModel {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    temperature: Option<f32>,
}

impl OpenAIModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    async fn chat(&self, prompt: &str, stream: bool) -> Result<reqwest::Response> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "stream": stream,
        });
        if let Some(t) = self.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }
        Ok(response)
    }
}

#[async_trait]
impl LanguageModel for OpenAIModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let json: Value = self.chat(prompt, false).await?.json().await?;
        json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing message content"))
    }

    async fn complete_stream(&self, prompt: &str) -> Result<TextStream> {
        let response = self.chat(prompt, true).await?;
        Ok(fragments(response.bytes_stream(), parse_openai_sse_line))
    }
}

/// One server-sent-events line of a chat completion stream.
fn parse_openai_sse_line(line: &str) -> Result<Option<String>> {
    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
        return Ok(None);
    };
    if data == "[DONE]" {
        return Ok(None);
    }
    let json: Value = serde_json::from_str(data).context("Invalid OpenAI stream event")?;
    Ok(json["choices"][0]["delta"]["content"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string))
}

// ============ Stream plumbing ============

struct LineReader<S> {
    bytes: S,
    buffer: Vec<u8>,
    done: bool,
}

/// Split a byte stream into trimmed text lines. A trailing line without a
/// newline is still produced. Bytes are decoded per line, so multi-byte
/// characters split across network chunks survive.
fn lines<S, B, E>(bytes: S) -> impl Stream<Item = Result<String>> + Send + 'static
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let reader = LineReader {
        bytes: bytes.boxed(),
        buffer: Vec::new(),
        done: false,
    };
    stream::unfold(reader, |mut reader| async move {
        loop {
            if let Some(pos) = reader.buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = reader.buffer.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line).trim().to_string();
                return Some((Ok(text), reader));
            }
            if reader.done {
                if reader.buffer.is_empty() {
                    return None;
                }
                let line = std::mem::take(&mut reader.buffer);
                let text = String::from_utf8_lossy(&line).trim().to_string();
                return Some((Ok(text), reader));
            }
            match reader.bytes.next().await {
                Some(Ok(chunk)) => reader.buffer.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    reader.done = true;
                    reader.buffer.clear();
                    return Some((Err(anyhow::Error::new(e).context("stream read error")), reader));
                }
                None => reader.done = true,
            }
        }
    })
}

/// Lines parsed into non-empty text fragments.
fn fragments<S, B, E>(bytes: S, parse: fn(&str) -> Result<Option<String>>) -> TextStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    lines(bytes)
        .filter_map(move |line| async move {
            match line {
                Ok(line) => parse(&line).transpose(),
                Err(e) => Some(Err(e)),
            }
        })
        .boxed()
}
