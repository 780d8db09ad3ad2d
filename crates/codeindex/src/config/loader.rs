use std::path::{Path, PathBuf};

use crate::config::schema::{Config, ProviderKind};
use crate::error::ConfigError;

/// `~/.codeindex/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".codeindex").join("config.json"))
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

/// Parses and validates a config document. Environment overrides are
/// not applied here.
pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Loads `path` if given, else the default config file if it exists,
/// else built-in defaults. Environment overrides are applied last.
pub fn load_or_default(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => match default_config_path().filter(|p| p.is_file()) {
            Some(path) => {
                log::debug!("Loading config from {}", path.display());
                load_config(path)?
            }
            None => Config::default(),
        },
    };

    apply_env_overrides(&mut config)?;
    validate_config(&config)?;
    Ok(config)
}

/// Applies process environment overrides.
pub fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    apply_overrides_from(config, |name| std::env::var(name).ok())
}

fn apply_overrides_from<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(value) = get("DEFAULT_EMBEDDING_PROVIDER") {
        config.embedding.provider =
            ProviderKind::parse(&value).ok_or_else(|| ConfigError::InvalidEnv {
                name: "DEFAULT_EMBEDDING_PROVIDER".to_string(),
                value: value.clone(),
            })?;
    }

    let (key_var, model_var) = match config.embedding.provider {
        ProviderKind::OpenAi => (Some("OPENAI_API_KEY"), Some("OPENAI_EMBEDDING_MODEL")),
        ProviderKind::HuggingFace => (
            Some("HUGGINGFACE_API_KEY"),
            Some("HUGGINGFACE_EMBEDDING_MODEL"),
        ),
        ProviderKind::OpenRouter => (
            Some("OPENROUTER_API_KEY"),
            Some("OPENROUTER_EMBEDDING_MODEL"),
        ),
        ProviderKind::Hashed => (None, None),
    };
    if let Some(key) = key_var.and_then(|name| get(name)) {
        config.embedding.api_key = Some(key);
    }
    if let Some(model) = model_var.and_then(|name| get(name)) {
        config.embedding.model = Some(model);
    }

    if let Some(value) = get("CODEINDEX_WORKERS") {
        config.worker_count = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEnv {
                name: "CODEINDEX_WORKERS".to_string(),
                value: value.clone(),
            })?;
    }
    if let Some(value) = get("CODEINDEX_DATABASE") {
        config.database_path = Some(PathBuf::from(value));
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be at least 1".to_string(),
        });
    }

    if config.scan.extensions.is_empty() {
        return Err(ConfigError::Validation {
            message: "scan.extensions must not be empty".to_string(),
        });
    }

    let embedding = &config.embedding;
    if embedding.dimension == 0 {
        return Err(ConfigError::Validation {
            message: "embedding.dimension must be at least 1".to_string(),
        });
    }
    if embedding.provider.requires_api_key() && embedding.api_key_optional().is_none() {
        return Err(ConfigError::Validation {
            message: format!(
                "embedding provider '{}' requires an API key",
                embedding.provider.as_str()
            ),
        });
    }

    Ok(())
}
