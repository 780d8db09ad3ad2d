use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database file. Defaults to `~/.codeindex/data/codeindex.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Width of the worker pool running extraction and embedding calls.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            worker_count: default_worker_count(),
            scan: ScanConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

fn default_worker_count() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// File extensions (without the dot) that are treated as source.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Directory names never descended into. Hidden directories are
    /// always skipped.
    #[serde(default = "default_skip_dirs")]
    pub skip_dirs: Vec<String>,
}

fn default_extensions() -> Vec<String> {
    vec!["py".to_string()]
}

fn default_skip_dirs() -> Vec<String> {
    ["__pycache__", "venv", "env", "node_modules", "site-packages"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            skip_dirs: default_skip_dirs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    HuggingFace,
    OpenRouter,
    #[default]
    Hashed,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::HuggingFace => "huggingface",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Hashed => "hashed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(ProviderKind::OpenAi),
            "huggingface" => Some(ProviderKind::HuggingFace),
            "openrouter" => Some(ProviderKind::OpenRouter),
            "hashed" => Some(ProviderKind::Hashed),
            _ => None,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "text-embedding-ada-002",
            ProviderKind::HuggingFace => "sentence-transformers/all-MiniLM-L6-v2",
            ProviderKind::OpenRouter => "openai/text-embedding-ada-002",
            ProviderKind::Hashed => crate::embedding::hashed::DEFAULT_MODEL,
        }
    }

    pub fn requires_api_key(&self) -> bool {
        matches!(self, ProviderKind::OpenAi | ProviderKind::OpenRouter)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    /// Model name; the provider's default when absent.
    #[serde(default)]
    pub model: Option<String>,
    /// Never written back out.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Overrides the provider's API base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Per-call timeout for remote providers.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    /// Entries kept in the in-memory embedding cache; 0 disables it.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_dimension() -> usize {
    1536
}

fn default_cache_capacity() -> u64 {
    10_000
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: None,
            api_key: None,
            base_url: None,
            timeout_secs: default_timeout_secs(),
            dimension: default_dimension(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl EmbeddingConfig {
    pub fn model_or_default(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The API key, required for this provider.
    pub fn api_key(&self) -> Result<SecretString, EmbeddingError> {
        self.api_key_optional()
            .ok_or(EmbeddingError::MissingApiKey {
                provider: self.provider.as_str(),
            })
    }

    pub fn api_key_optional(&self) -> Option<SecretString> {
        self.api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .map(|k| SecretString::from(k.trim().to_string()))
    }
}
