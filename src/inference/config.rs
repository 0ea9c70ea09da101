//! Provider selection and configuration.
//!
//! Selection is a pure function of its inputs; the environment is passed in
//! as a lookup closure so nothing here reads process globals directly.

use std::fmt;
use std::str::FromStr;

use super::errors::ProviderError;

pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const OPENAI_BASE_URL: &str = "OPENAI_BASE_URL";
pub const OPENAI_MODEL: &str = "OPENAI_MODEL";
pub const OLLAMA_BASE_URL: &str = "OLLAMA_BASE_URL";
pub const OLLAMA_MODEL: &str = "OLLAMA_MODEL";

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_OLLAMA_MODEL: &str = "qwen2.5:7b";

// ─── ProviderKind ────────────────────────────────────────────────────────────

/// Which completion API to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// Hosted OpenAI Chat Completions (or a compatible endpoint).
    OpenAi,
    /// Locally hosted Ollama.
    Ollama,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Ollama => "ollama",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "ollama" => Ok(ProviderKind::Ollama),
            other => Err(format!(
                "unknown provider '{other}' (valid options: openai, ollama)"
            )),
        }
    }
}

/// Explicit choice wins; otherwise OpenAI when a cloud credential is
/// present, else Ollama.
pub fn select_provider(explicit: Option<ProviderKind>, cloud_credential_present: bool) -> ProviderKind {
    match explicit {
        Some(kind) => kind,
        None if cloud_credential_present => ProviderKind::OpenAi,
        None => ProviderKind::Ollama,
    }
}

// ─── ProviderConfig ──────────────────────────────────────────────────────────

/// Fully resolved provider settings.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub model: String,
    /// Base URL without a trailing slash.
    pub base_url: String,
    /// Bearer credential; only used by OpenAI.
    pub api_key: Option<String>,
}

impl ProviderConfig {
    /// Resolve settings from explicit choices and an environment lookup.
    ///
    /// Empty environment values count as unset.
    pub fn resolve(
        explicit_provider: Option<ProviderKind>,
        explicit_model: Option<&str>,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, ProviderError> {
        let lookup = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let api_key = lookup(OPENAI_API_KEY);
        let kind = select_provider(explicit_provider, api_key.is_some());
        let explicit_model = explicit_model.filter(|m| !m.trim().is_empty());

        let config = match kind {
            ProviderKind::OpenAi => {
                let api_key = api_key.ok_or_else(|| ProviderError::Config {
                    reason: format!("{OPENAI_API_KEY} environment variable not set"),
                })?;
                Self {
                    kind,
                    model: explicit_model
                        .map(str::to_string)
                        .or_else(|| lookup(OPENAI_MODEL))
                        .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
                    base_url: normalize_base_url(
                        lookup(OPENAI_BASE_URL).unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
                    ),
                    api_key: Some(api_key),
                }
            }
            ProviderKind::Ollama => Self {
                kind,
                model: explicit_model
                    .map(str::to_string)
                    .or_else(|| lookup(OLLAMA_MODEL))
                    .unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()),
                base_url: normalize_base_url(
                    lookup(OLLAMA_BASE_URL).unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.to_string()),
                ),
                api_key: None,
            },
        };

        tracing::info!(
            provider = %config.kind,
            model = %config.model,
            base_url = %config.base_url,
            explicit = explicit_provider.is_some(),
            "provider selected"
        );
        Ok(config)
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn normalize_base_url(url: String) -> String {
    url.trim().trim_end_matches('/').to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_select_provider_precedence() {
        assert_eq!(select_provider(Some(ProviderKind::Ollama), true), ProviderKind::Ollama);
        assert_eq!(select_provider(Some(ProviderKind::OpenAi), false), ProviderKind::OpenAi);
        assert_eq!(select_provider(None, true), ProviderKind::OpenAi);
        assert_eq!(select_provider(None, false), ProviderKind::Ollama);
    }

    #[test]
    fn test_resolve_defaults_to_ollama_without_key() {
        let env = env_from(&[]);
        let config = ProviderConfig::resolve(None, None, &env).unwrap();
        assert_eq!(config.kind, ProviderKind::Ollama);
        assert_eq!(config.model, "qwen2.5:7b");
        assert_eq!(config.base_url, "http://localhost:11434");
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_resolve_auto_detects_openai() {
        let env = env_from(&[(OPENAI_API_KEY, "sk-test"), (OPENAI_BASE_URL, "http://proxy/v1/")]);
        let config = ProviderConfig::resolve(None, None, &env).unwrap();
        assert_eq!(config.kind, ProviderKind::OpenAi);
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.base_url, "http://proxy/v1");
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_resolve_explicit_model_beats_env() {
        let env = env_from(&[(OLLAMA_MODEL, "llama3.2:3b")]);
        let config = ProviderConfig::resolve(None, None, &env).unwrap();
        assert_eq!(config.model, "llama3.2:3b");

        let config = ProviderConfig::resolve(None, Some("phi4:14b"), &env).unwrap();
        assert_eq!(config.model, "phi4:14b");
    }

    #[test]
    fn test_openai_without_key_is_config_error() {
        let env = env_from(&[(OPENAI_API_KEY, "  ")]);
        let err = ProviderConfig::resolve(Some(ProviderKind::OpenAi), None, &env).unwrap_err();
        assert!(matches!(err, ProviderError::Config { .. }));
    }

    #[test]
    fn test_debug_redacts_key() {
        let env = env_from(&[(OPENAI_API_KEY, "sk-very-secret")]);
        let config = ProviderConfig::resolve(None, None, &env).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_provider_kind_from_str() {
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!("ollama".parse::<ProviderKind>().unwrap(), ProviderKind::Ollama);
        assert!("claude".parse::<ProviderKind>().is_err());
    }
}
