//! HuggingFace inference API (feature-extraction pipeline).

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::blocking::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::error::{EmbeddingError, Result};
use super::openai::truncate_body;
use super::Embedder;

pub const INFERENCE_BASE_URL: &str = "https://api-inference.huggingface.co/pipeline/feature-extraction";

const PROVIDER: &str = "HuggingFace";

#[derive(Serialize)]
struct FeatureRequest<'a> {
    inputs: &'a str,
    options: FeatureOptions,
}

#[derive(Serialize)]
struct FeatureOptions {
    wait_for_model: bool,
}

/// Sentence-transformer models answer with one vector, token-level models
/// with one vector per token.
#[derive(Deserialize)]
#[serde(untagged)]
enum FeatureResponse {
    Pooled(Vec<f32>),
    Tokens(Vec<Vec<f32>>),
}

impl FeatureResponse {
    fn into_embedding(self) -> Option<Vec<f32>> {
        let vector = match self {
            FeatureResponse::Pooled(v) => v,
            FeatureResponse::Tokens(tokens) => mean_pool(&tokens)?,
        };
        if vector.is_empty() {
            return None;
        }
        Some(normalize(vector))
    }
}

fn mean_pool(tokens: &[Vec<f32>]) -> Option<Vec<f32>> {
    let width = tokens.first()?.len();
    let mut sum = vec![0.0_f32; width];
    for token in tokens {
        if token.len() != width {
            return None;
        }
        for (acc, value) in sum.iter_mut().zip(token) {
            *acc += value;
        }
    }
    let count = tokens.len() as f32;
    Some(sum.into_iter().map(|v| v / count).collect())
}

fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
    vector
}

pub struct HuggingFaceEmbedder {
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
    dimension: usize,
    timeout: Duration,
    client: OnceLock<Client>,
}

impl HuggingFaceEmbedder {
    pub fn new(
        base_url: &str,
        model: String,
        api_key: Option<SecretString>,
        dimension: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            endpoint: format!("{}/{}", base_url.trim_end_matches('/'), model),
            model,
            api_key,
            dimension,
            timeout,
            client: OnceLock::new(),
        }
    }

    fn client(&self) -> Result<&Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = Client::builder().timeout(self.timeout).build()?;
        Ok(self.client.get_or_init(|| client))
    }
}

impl Embedder for HuggingFaceEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let _span = tracing::debug_span!("embedding.request", provider = PROVIDER).entered();

        let mut request = self.client()?.post(&self.endpoint).json(&FeatureRequest {
            inputs: text,
            options: FeatureOptions {
                wait_for_model: true,
            },
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }
        let response = request.send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(EmbeddingError::Status {
                provider: PROVIDER,
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let parsed: FeatureResponse = response.json()?;
        parsed
            .into_embedding()
            .ok_or_else(|| EmbeddingError::InvalidResponse {
                provider: PROVIDER,
                reason: "empty or ragged feature vectors".to_string(),
            })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
