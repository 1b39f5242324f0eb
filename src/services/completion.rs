use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::{CompletionBackend, CompletionSettings};
use crate::error::CompletionError;
use crate::services::claude::ClaudeCli;

/// The AI collaborator: takes a prompt, returns text, honors the token
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, cancel: CancellationToken, prompt: &str) -> Result<String, CompletionError>;
}

/// Build the backend selected in settings
pub fn from_settings(settings: &CompletionSettings) -> Result<Arc<dyn CompletionService>, CompletionError> {
    match settings.backend {
        CompletionBackend::ClaudeCli => Ok(Arc::new(ClaudeCli::new(settings.model.clone()))),
        CompletionBackend::Http => {
            let api_key = settings
                .api_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok());
            let http = HttpCompletion::new(
                &settings.endpoint,
                settings.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string()),
                api_key,
                Duration::from_secs(settings.timeout_secs),
            )?;
            Ok(Arc::new(http))
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

/// OpenAI-compatible `chat/completions` client
pub struct HttpCompletion {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpCompletion {
    pub fn new(
        endpoint: &str,
        model: String,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, CompletionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CompletionError::Unavailable(e.to_string()))?;
        let url = format!("{}/chat/completions", endpoint.trim_end_matches('/'));
        Ok(Self {
            client,
            url,
            model,
            api_key,
        })
    }

    async fn request(&self, prompt: &str) -> Result<String, CompletionError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };
        let mut req = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let response = req
            .send()
            .await
            .map_err(|e| CompletionError::Request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CompletionError::Request(format!("HTTP {status}: {}", text.trim())));
        }
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Malformed(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| CompletionError::Malformed("no choices in response".to_string()))
    }
}

#[async_trait]
impl CompletionService for HttpCompletion {
    async fn complete(&self, cancel: CancellationToken, prompt: &str) -> Result<String, CompletionError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CompletionError::Cancelled),
            result = self.request(prompt) => result,
        }
    }
}
