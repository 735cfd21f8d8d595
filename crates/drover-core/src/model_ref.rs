use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DroverError;

/// The closed set of canonical provider ids. Aliases normalize into this set
/// at parse time; anything else is a configuration error.
pub const CANONICAL_PROVIDERS: &[&str] = &[
    "claude",
    "openai",
    "openai-codex",
    "gemini",
    "gemini-cli",
    "xai",
    "scalytics-copilot",
    "openrouter",
    "deepseek",
    "groq",
    "vllm",
];

pub fn is_canonical(id: &str) -> bool {
    CANONICAL_PROVIDERS.contains(&id)
}

/// Normalize a provider id or alias to its canonical form (case-insensitive).
///
/// `google` is ambiguous: it means the API-key Gemini backend when a Gemini
/// key is configured, and the CLI-OAuth backend otherwise. The caller passes
/// that single bit of context.
pub fn normalize_provider(id: &str, has_gemini_api_key: bool) -> Result<String, DroverError> {
    let lower = id.to_ascii_lowercase();
    let canonical = match lower.as_str() {
        "google" => {
            if has_gemini_api_key {
                "gemini"
            } else {
                "gemini-cli"
            }
        }
        "codex" => "openai-codex",
        "anthropic" => "claude",
        "copilot" => "scalytics-copilot",
        "grok" => "xai",
        other if is_canonical(other) => other,
        _ => {
            return Err(DroverError::UnknownProvider {
                provider_id: id.to_string(),
                remediation: format!(
                    "run `drover models auth set-key --provider {}` or check providers.* in the config",
                    lower
                ),
            })
        }
    };
    Ok(canonical.to_string())
}

/// A `<provider-id>/<model-id>` reference. The model id may itself contain
/// `/` (proxy providers like openrouter pass it through verbatim).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelRef {
    provider: String,
    model: String,
}

impl ModelRef {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }

    /// Parse and normalize a model reference string.
    ///
    /// A bare model name (no slash) synthesizes `openai/<name>` for
    /// backward compatibility with configs that predate provider prefixes.
    pub fn parse(raw: &str, has_gemini_api_key: bool) -> Result<Self, DroverError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(DroverError::MalformedModelRef(raw.to_string()));
        }
        match raw.split_once('/') {
            Some((provider, model)) => {
                if model.is_empty() {
                    return Err(DroverError::MalformedModelRef(raw.to_string()));
                }
                let provider = normalize_provider(provider, has_gemini_api_key)?;
                Ok(Self::new(provider, model))
            }
            None => {
                tracing::warn!(
                    model = %raw,
                    "bare model name without provider prefix, assuming openai (legacy compat)"
                );
                Ok(Self::new("openai", raw))
            }
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

impl TryFrom<String> for ModelRef {
    type Error = DroverError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        // Serde path has no key context; `google` resolves to the CLI flavor.
        ModelRef::parse(&value, false)
    }
}

impl From<ModelRef> for String {
    fn from(value: ModelRef) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_and_model() {
        let mref = ModelRef::parse("claude/claude-sonnet-4-5", false).unwrap();
        assert_eq!(mref.provider(), "claude");
        assert_eq!(mref.model(), "claude-sonnet-4-5");
    }

    #[test]
    fn model_id_keeps_extra_slashes() {
        let mref = ModelRef::parse("openrouter/meta-llama/llama-3.1-70b", false).unwrap();
        assert_eq!(mref.provider(), "openrouter");
        assert_eq!(mref.model(), "meta-llama/llama-3.1-70b");
    }

    #[test]
    fn aliases_normalize_case_insensitively() {
        assert_eq!(
            ModelRef::parse("Anthropic/claude-sonnet-4-5", false)
                .unwrap()
                .provider(),
            "claude"
        );
        assert_eq!(
            ModelRef::parse("CODEX/gpt-5.3-codex", false).unwrap().provider(),
            "openai-codex"
        );
        assert_eq!(ModelRef::parse("grok/grok-2", false).unwrap().provider(), "xai");
        assert_eq!(
            ModelRef::parse("copilot/gpt-4o", false).unwrap().provider(),
            "scalytics-copilot"
        );
    }

    #[test]
    fn google_alias_depends_on_gemini_key() {
        assert_eq!(
            ModelRef::parse("google/gemini-2.0-flash", true).unwrap().provider(),
            "gemini"
        );
        assert_eq!(
            ModelRef::parse("google/gemini-2.0-flash", false).unwrap().provider(),
            "gemini-cli"
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        for alias in ["anthropic", "codex", "copilot", "grok", "google"] {
            let once = normalize_provider(alias, false).unwrap();
            let twice = normalize_provider(&once, false).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn bare_model_synthesizes_openai() {
        let mref = ModelRef::parse("gpt-4o-mini", false).unwrap();
        assert_eq!(mref.provider(), "openai");
        assert_eq!(mref.model(), "gpt-4o-mini");
    }

    #[test]
    fn rejects_unknown_provider_with_remediation() {
        let err = ModelRef::parse("mystery/model-1", false).unwrap_err();
        match err {
            DroverError::UnknownProvider { provider_id, remediation } => {
                assert_eq!(provider_id, "mystery");
                assert!(remediation.contains("set-key"));
            }
            other => panic!("expected UnknownProvider, got {other:?}"),
        }
    }

    #[test]
    fn rejects_empty_model_segment() {
        assert!(ModelRef::parse("openai/", false).is_err());
        assert!(ModelRef::parse("", false).is_err());
    }

    #[test]
    fn display_round_trips() {
        let mref = ModelRef::parse("groq/llama-3.3-70b-versatile", false).unwrap();
        let again = ModelRef::parse(&mref.to_string(), false).unwrap();
        assert_eq!(mref, again);
    }
}
