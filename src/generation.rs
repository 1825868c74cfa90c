//! Text generation providers.
//!
//! Implements [`marketmuse_core::answer::Generator`] for:
//! - **`openai`**: OpenAI-compatible `/chat/completions` (Groq by default).
//! - **`ollama`**: a running Ollama instance's `/api/generate`.
//! - **`disabled`**: every call fails; retrieval-only deployments.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use marketmuse_core::answer::Generator;
use marketmuse_core::Error;

use crate::config::GenerationConfig;
use crate::remote;

/// Build the generator named by `config.provider`, bounded by
/// `generation.timeout_secs` per call.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    let inner: Arc<dyn Generator> = match config.provider.as_str() {
        "openai" => Arc::new(ChatCompletionsGenerator::new(config)?),
        "ollama" => Arc::new(OllamaGenerator::new(config)?),
        "disabled" => return Ok(Arc::new(DisabledGenerator)),
        other => bail!("Unknown generation provider: {}", other),
    };
    Ok(Arc::new(Timed::new(
        inner,
        Duration::from_secs(config.timeout_secs),
    )))
}

/// Fails a generation that takes longer than `timeout`, retries included.
pub struct Timed {
    inner: Arc<dyn Generator>,
    timeout: Duration,
}

impl Timed {
    pub fn new(inner: Arc<dyn Generator>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl Generator for Timed {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn generate(&self, prompt: &str) -> marketmuse_core::Result<String> {
        match tokio::time::timeout(self.timeout, self.inner.generate(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(Error::GenerationService(format!(
                "{} timed out after {}s",
                self.inner.model_name(),
                self.timeout.as_secs_f32()
            ))),
        }
    }
}

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str) -> marketmuse_core::Result<String> {
        Err(Error::GenerationService(
            "generation is disabled (generation.provider = \"disabled\")".to_string(),
        ))
    }
}

/// OpenAI-compatible chat completions.
///
/// The API key is read from `api_key_env` on each call, so a missing key
/// only fails `ask`, never ingestion or search.
pub struct ChatCompletionsGenerator {
    client: reqwest::Client,
    model: String,
    url: String,
    api_key_env: String,
    temperature: f32,
    max_tokens: Option<u32>,
    max_retries: u32,
}

impl ChatCompletionsGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            client: remote::client(config.timeout_secs)?,
            model: config.model.clone(),
            url: config.url.clone(),
            api_key_env: config.api_key_env.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
        })
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });
        if let Some(max) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        body
    }

    async fn request(&self, prompt: &str) -> Result<String> {
        let api_key = remote::api_key(&self.api_key_env)
            .ok_or_else(|| anyhow::anyhow!("{} environment variable not set", self.api_key_env))?;
        let json = remote::post_json(
            &self.client,
            &remote::endpoint(&self.url, "chat/completions"),
            Some(&api_key),
            &self.request_body(prompt),
            self.max_retries,
            "Chat completions",
        )
        .await?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Invalid chat completions response: missing choices[0].message.content"
            )
        })
}

#[async_trait]
impl Generator for ChatCompletionsGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> marketmuse_core::Result<String> {
        self.request(prompt)
            .await
            .map_err(|e| Error::GenerationService(format!("{:#}", e)))
    }
}

pub struct OllamaGenerator {
    client: reqwest::Client,
    model: String,
    url: String,
    temperature: f32,
    max_retries: u32,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        // The default base URL points at Groq; Ollama listens locally.
        let url = if config.url == GenerationConfig::default().url {
            "http://localhost:11434".to_string()
        } else {
            config.url.clone()
        };
        Ok(Self {
            client: remote::client(config.timeout_secs)?,
            model: config.model.clone(),
            url,
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    async fn request(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": self.temperature },
        });
        let json = remote::post_json(
            &self.client,
            &remote::endpoint(&self.url, "api/generate"),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        json.get("response")
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing response field"))
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> marketmuse_core::Result<String> {
        self.request(prompt)
            .await
            .map_err(|e| Error::GenerationService(format!("{:#}", e)))
    }
}
