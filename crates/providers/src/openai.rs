//! OpenAI-compatible chat-completions adapter.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use ens_domain::config::LlmConfig;
use ens_domain::error::{Error, Result};

use crate::traits::{CompleteOptions, Completer};

/// Adapter for any endpoint speaking the OpenAI chat-completions wire
/// format.
pub struct OpenAiCompleter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    id: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompleter {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Internal(format!("building http client: {e}")))?;
        let model = model.into();
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
            id: format!("openai/{model}"),
            model,
        })
    }

    /// Build from config, reading the API key from the configured
    /// environment variable.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            Error::DependencyUnavailable(format!(
                "no model API key: set {} to use the {} endpoint",
                config.api_key_env, config.base_url
            ))
        })?;
        Self::new(&config.base_url, api_key, &config.model)
    }
}

#[async_trait::async_trait]
impl Completer for OpenAiCompleter {
    async fn complete(&self, system: &str, user: &str, opts: &CompleteOptions) -> Result<String> {
        let mut body = json!({
            "model": self.model,
            "temperature": opts.temperature,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });
        if let Some(max_tokens) = opts.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if opts.json {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::TransientExternal(format!("model request: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::DependencyUnavailable(format!(
                "model endpoint rejected credentials ({status})"
            )));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::TransientExternal(format!(
                "model endpoint returned {status}: {}",
                text.chars().take(200).collect::<String>()
            )));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::TransientExternal(format!("model response body: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::MalformedOutput("model returned no content".into()))
    }

    fn id(&self) -> &str {
        &self.id
    }
}
