use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use quarry_embed::DEFAULT_DIM;

use crate::error::ConfigError;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_MAX_ROUNDS: usize = 20;

/// Runtime configuration, passed explicitly to whatever needs it.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    /// Base URL of the OpenAI-compatible completion service.
    pub llm_base_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub temperature: f32,
    pub llm_timeout: Duration,
    pub query_timeout: Duration,
    pub store_dir: PathBuf,
    pub namespace: String,
    pub embed_dim: usize,
    /// When unset the offline hashing embedder is used.
    pub embed_api_url: Option<String>,
    pub embed_model: String,
    pub top_k: usize,
    pub max_rounds: usize,
    pub max_context_chars: usize,
    pub preview_rows: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm_base_url: None,
            llm_api_key: None,
            llm_model: DEFAULT_MODEL.into(),
            temperature: 0.1,
            llm_timeout: Duration::from_secs(120),
            query_timeout: Duration::from_secs(30),
            store_dir: PathBuf::from("./knowledge"),
            namespace: "default".into(),
            embed_dim: DEFAULT_DIM,
            embed_api_url: None,
            embed_model: "text-embedding-3-small".into(),
            top_k: 3,
            max_rounds: DEFAULT_MAX_ROUNDS,
            max_context_chars: quarry_context::DEFAULT_MAX_CHARS,
            preview_rows: 5,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key/value source; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Settings::default();

        Ok(Self {
            llm_base_url: get("LLM_API_URL").map(|u| u.trim_end_matches('/').to_string()),
            llm_api_key: get("LLM_API_KEY"),
            llm_model: get("LLM_MODEL").unwrap_or(defaults.llm_model),
            temperature: parse_or(&get, "LLM_TEMPERATURE", defaults.temperature)?,
            llm_timeout: Duration::from_secs(parse_or(
                &get,
                "LLM_TIMEOUT_SECS",
                defaults.llm_timeout.as_secs(),
            )?),
            query_timeout: Duration::from_secs(parse_or(
                &get,
                "QUERY_TIMEOUT_SECS",
                defaults.query_timeout.as_secs(),
            )?),
            store_dir: get("QUARRY_STORE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.store_dir),
            namespace: get("QUARRY_NAMESPACE").unwrap_or(defaults.namespace),
            embed_dim: parse_or(&get, "EMBED_DIM", defaults.embed_dim)?,
            embed_api_url: get("EMBED_API_URL"),
            embed_model: get("EMBED_MODEL").unwrap_or(defaults.embed_model),
            top_k: parse_or(&get, "QUARRY_TOP_K", defaults.top_k)?,
            max_rounds: parse_or(&get, "QUARRY_MAX_ROUNDS", defaults.max_rounds)?,
            max_context_chars: parse_or(
                &get,
                "QUARRY_MAX_CONTEXT_CHARS",
                defaults.max_context_chars,
            )?,
            preview_rows: parse_or(&get, "QUARRY_PREVIEW_ROWS", defaults.preview_rows)?,
        })
    }

    pub fn require_llm_url(&self) -> Result<&str, ConfigError> {
        self.llm_base_url
            .as_deref()
            .ok_or(ConfigError::MissingVar("LLM_API_URL"))
    }
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}
