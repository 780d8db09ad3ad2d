//! Embedding generation.
//!
//! Providers are a closed set selected from configuration. Each one is a
//! blocking `text -> vector` call; the engine runs them on its worker pool.

use std::sync::Arc;

use crate::config::{EmbeddingConfig, ProviderKind};

pub mod cache;
pub mod error;
pub mod hashed;
pub mod huggingface;
pub mod openai;

pub use cache::CachedEmbedder;
pub use error::EmbeddingError;
pub use hashed::HashedEmbedder;
pub use huggingface::HuggingFaceEmbedder;
pub use openai::OpenAiCompatibleEmbedder;

/// Turns source text into a vector.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> error::Result<Vec<f32>>;

    /// Expected vector length.
    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Every supported provider.
pub enum EmbeddingProvider {
    OpenAi(OpenAiCompatibleEmbedder),
    OpenRouter(OpenAiCompatibleEmbedder),
    HuggingFace(HuggingFaceEmbedder),
    Hashed(HashedEmbedder),
}

impl EmbeddingProvider {
    /// Builds the provider named by `config.provider`.
    pub fn from_config(config: &EmbeddingConfig) -> error::Result<Self> {
        let model = config.model_or_default().to_string();
        let timeout = config.timeout();

        let provider = match config.provider {
            ProviderKind::OpenAi => EmbeddingProvider::OpenAi(OpenAiCompatibleEmbedder::new(
                "OpenAI",
                config.base_url.as_deref().unwrap_or(openai::OPENAI_BASE_URL),
                model,
                config.api_key()?,
                config.dimension,
                timeout,
            )),
            ProviderKind::OpenRouter => {
                EmbeddingProvider::OpenRouter(OpenAiCompatibleEmbedder::new(
                    "OpenRouter",
                    config
                        .base_url
                        .as_deref()
                        .unwrap_or(openai::OPENROUTER_BASE_URL),
                    model,
                    config.api_key()?,
                    config.dimension,
                    timeout,
                ))
            }
            ProviderKind::HuggingFace => EmbeddingProvider::HuggingFace(HuggingFaceEmbedder::new(
                config
                    .base_url
                    .as_deref()
                    .unwrap_or(huggingface::INFERENCE_BASE_URL),
                model,
                config.api_key_optional(),
                config.dimension,
                timeout,
            )),
            ProviderKind::Hashed => {
                EmbeddingProvider::Hashed(HashedEmbedder::new(model, config.dimension))
            }
        };
        Ok(provider)
    }

    fn as_embedder(&self) -> &dyn Embedder {
        match self {
            EmbeddingProvider::OpenAi(p) | EmbeddingProvider::OpenRouter(p) => p,
            EmbeddingProvider::HuggingFace(p) => p,
            EmbeddingProvider::Hashed(p) => p,
        }
    }
}

impl Embedder for EmbeddingProvider {
    fn embed(&self, text: &str) -> error::Result<Vec<f32>> {
        self.as_embedder().embed(text)
    }

    fn dimension(&self) -> usize {
        self.as_embedder().dimension()
    }

    fn model_name(&self) -> &str {
        self.as_embedder().model_name()
    }
}

/// Builds the configured provider, wrapped in a cache when
/// `cache_capacity > 0`.
pub fn build_embedder(config: &EmbeddingConfig) -> error::Result<Arc<dyn Embedder>> {
    let provider = EmbeddingProvider::from_config(config)?;
    log::info!(
        "Embedding provider {:?} with model {}",
        config.provider,
        provider.model_name()
    );
    if config.cache_capacity == 0 {
        return Ok(Arc::new(provider));
    }
    Ok(Arc::new(CachedEmbedder::new(
        Arc::new(provider),
        config.cache_capacity,
    )))
}
