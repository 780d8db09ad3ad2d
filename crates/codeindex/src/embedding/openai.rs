//! OpenAI-compatible `/embeddings` endpoint, used for OpenAI and OpenRouter.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::blocking::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::error::{EmbeddingError, Result};
use super::Embedder;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Maximum length of an error body kept in task error messages.
pub(crate) const MAX_ERROR_BODY_LENGTH: usize = 200;

pub(crate) fn truncate_body(body: &str) -> String {
    if body.len() > MAX_ERROR_BODY_LENGTH {
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &body[..end])
    } else {
        body.to_string()
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

pub struct OpenAiCompatibleEmbedder {
    provider: &'static str,
    endpoint: String,
    model: String,
    api_key: SecretString,
    dimension: usize,
    timeout: Duration,
    // Built on first use so the client lives on a worker thread.
    client: OnceLock<Client>,
}

impl OpenAiCompatibleEmbedder {
    pub fn new(
        provider: &'static str,
        base_url: &str,
        model: String,
        api_key: SecretString,
        dimension: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model,
            api_key,
            dimension,
            timeout,
            client: OnceLock::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn client(&self) -> Result<&Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = Client::builder().timeout(self.timeout).build()?;
        Ok(self.client.get_or_init(|| client))
    }
}

impl Embedder for OpenAiCompatibleEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let _span = tracing::debug_span!("embedding.request", provider = self.provider).entered();

        let response = self
            .client()?
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&EmbeddingRequest {
                model: &self.model,
                input: text,
            })
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(EmbeddingError::Status {
                provider: self.provider,
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let parsed: EmbeddingResponse = response.json()?;
        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| EmbeddingError::InvalidResponse {
                provider: self.provider,
                reason: "response contained no embedding".to_string(),
            })?;
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
