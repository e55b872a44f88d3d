//! Per-vendor provider settings.
//!
//! Settings are read from `<config_dir>/<vendor>_config.{json,yaml,yml}` when
//! present, then overridden from the environment:
//!
//! | Variable | Vendor | Effect |
//! |----------|--------|--------|
//! | `GEMINI_API_KEY` | gemini | API key |
//! | `OPENAI_API_KEY` | openai | API key |
//! | `ANTHROPIC_API_KEY` | claude | API key |
//! | `DEEPSEEK_BASE_URL` | deepseek | Ollama server URL |
//! | `<VENDOR>_BASE_URL` | all | API base URL |
//! | `<VENDOR>_MODEL_FAST` | all | Model for the `fast` tier |
//! | `<VENDOR>_MODEL_POWERFUL` | all | Model for the `powerful` tier |
//! | `<VENDOR>_TIMEOUT_SECS` | all | Request timeout |
//!
//! `<VENDOR>` is `GEMINI`, `OPENAI`, `CLAUDE` or `DEEPSEEK`. A missing file
//! is not an error; a missing or placeholder key only fails the vendor that
//! needs it, when that vendor is constructed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use tripline_core::defaults::{GEN_TIMEOUT_SECS, LOCAL_GEN_TIMEOUT_SECS};
use tripline_core::{Error, ProviderKind, Result, Tier};

/// Directory searched for vendor config files when none is given.
pub const DEFAULT_CONFIG_DIR: &str = "config";

/// Concrete model per logical tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelMapping {
    pub fast: Option<String>,
    pub powerful: Option<String>,
}

impl ModelMapping {
    pub fn get(&self, tier: Tier) -> Option<&str> {
        match tier {
            Tier::Fast => self.fast.as_deref(),
            Tier::Powerful => self.powerful.as_deref(),
        }
    }
}

/// USD price per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_1m: f64,
    pub output_per_1m: f64,
}

/// Configuration object for one vendor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    #[serde(alias = "model")]
    pub default_model: Option<String>,
    pub model_mapping: ModelMapping,
    /// Exact model identifier to price.
    pub pricing: BTreeMap<String, ModelPricing>,
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Built-in model for a tier when configuration names none.
pub fn default_model(kind: ProviderKind, tier: Tier) -> &'static str {
    match (kind, tier) {
        (ProviderKind::Gemini, Tier::Fast) => "gemini-2.5-flash",
        (ProviderKind::Gemini, Tier::Powerful) => "gemini-2.5-pro",
        (ProviderKind::OpenAi, Tier::Fast) => "gpt-4o-mini",
        (ProviderKind::OpenAi, Tier::Powerful) => "gpt-4o",
        (ProviderKind::Claude, Tier::Fast) => "claude-3-5-haiku-20241022",
        (ProviderKind::Claude, Tier::Powerful) => "claude-sonnet-4-20250514",
        (ProviderKind::DeepSeek, Tier::Fast) => "deepseek-r1:7b",
        (ProviderKind::DeepSeek, Tier::Powerful) => "deepseek-r1:14b",
    }
}

/// True for empty keys and template values such as `YOUR_CLAUDE_API_KEY_HERE`.
pub fn is_placeholder(key: &str) -> bool {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return true;
    }
    let lower = trimmed.to_ascii_lowercase();
    (lower.starts_with("your") && (lower.ends_with("here") || lower.contains("api")))
        || lower.starts_with('<')
        || matches!(
            lower.as_str(),
            "changeme" | "change-me" | "placeholder" | "none" | "null" | "todo"
        )
        || (lower.len() >= 3 && lower.chars().all(|c| c == 'x' || c == '*' || c == '-'))
}

fn env_prefix(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Gemini => "GEMINI",
        ProviderKind::OpenAi => "OPENAI",
        ProviderKind::Claude => "CLAUDE",
        ProviderKind::DeepSeek => "DEEPSEEK",
    }
}

fn api_key_var(kind: ProviderKind) -> Option<&'static str> {
    match kind {
        ProviderKind::Gemini => Some("GEMINI_API_KEY"),
        ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
        ProviderKind::Claude => Some("ANTHROPIC_API_KEY"),
        ProviderKind::DeepSeek => None,
    }
}

impl ProviderSettings {
    /// Load settings for `kind` from `config_dir` and the environment.
    pub fn load(kind: ProviderKind, config_dir: &Path) -> Result<Self> {
        let mut settings = match find_config_file(kind, config_dir) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        settings.apply_overrides(kind, |name| std::env::var(name).ok());
        Ok(settings)
    }

    /// Parse a JSON or YAML settings file, chosen by extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let parsed = if is_yaml {
            serde_yaml::from_str(&raw).map_err(|e| e.to_string())
        } else {
            serde_json::from_str(&raw).map_err(|e| e.to_string())
        };
        parsed.map_err(|e| Error::Config(format!("invalid {}: {}", path.display(), e)))
    }

    /// Apply environment-style overrides through `lookup`.
    pub fn apply_overrides(&mut self, kind: ProviderKind, lookup: impl Fn(&str) -> Option<String>) {
        let prefix = env_prefix(kind);
        let get = |suffix: &str| lookup(&format!("{prefix}_{suffix}")).filter(|v| !v.is_empty());

        if let Some(key) = api_key_var(kind).and_then(&lookup).filter(|v| !v.is_empty()) {
            self.api_key = Some(key);
        }
        if let Some(url) = get("BASE_URL") {
            self.base_url = Some(url);
        }
        if let Some(model) = get("MODEL_FAST") {
            self.model_mapping.fast = Some(model);
        }
        if let Some(model) = get("MODEL_POWERFUL") {
            self.model_mapping.powerful = Some(model);
        }
        if let Some(secs) = get("TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.timeout_secs = Some(secs);
        }
    }

    /// Model for `tier`: the tier mapping, then `default_model`, then the
    /// built-in tier default.
    pub fn model_for(&self, kind: ProviderKind, tier: Tier) -> String {
        self.model_mapping
            .get(tier)
            .or(self.default_model.as_deref())
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| default_model(kind, tier))
            .to_string()
    }

    /// The API key, or a configuration error when it is absent or a placeholder.
    pub fn require_api_key(&self, kind: ProviderKind) -> Result<&str> {
        match self.api_key.as_deref() {
            Some(key) if !is_placeholder(key) => Ok(key),
            Some(_) => Err(Error::Config(format!(
                "{} API key is a placeholder; set {} or update {}_config.json",
                kind,
                api_key_var(kind).unwrap_or("the api_key field"),
                kind
            ))),
            None => Err(Error::Config(format!(
                "{} API key not configured; set {} or create {}_config.json",
                kind,
                api_key_var(kind).unwrap_or("the api_key field"),
                kind
            ))),
        }
    }

    pub fn timeout(&self, kind: ProviderKind) -> Duration {
        let default = match kind {
            ProviderKind::DeepSeek => LOCAL_GEN_TIMEOUT_SECS,
            _ => GEN_TIMEOUT_SECS,
        };
        Duration::from_secs(self.timeout_secs.unwrap_or(default))
    }

    pub fn base_url_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.base_url
            .as_deref()
            .map(|u| u.trim_end_matches('/'))
            .filter(|u| !u.is_empty())
            .unwrap_or(default)
    }
}

fn find_config_file(kind: ProviderKind, config_dir: &Path) -> Option<PathBuf> {
    ["json", "yaml", "yml"]
        .iter()
        .map(|ext| config_dir.join(format!("{}_config.{}", kind, ext)))
        .find(|p| p.is_file())
        .inspect(|p| debug!(subsystem = "inference", path = %p.display(), "Found provider config"))
}

/// Config directory from `TRIPLINE_CONFIG_DIR`, else [`DEFAULT_CONFIG_DIR`].
pub fn config_dir_from_env() -> PathBuf {
    std::env::var("TRIPLINE_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_placeholder_detection() {
        assert!(is_placeholder(""));
        assert!(is_placeholder("YOUR_CLAUDE_API_KEY_HERE"));
        assert!(is_placeholder("your-api-key"));
        assert!(is_placeholder("xxxxxxxx"));
        assert!(is_placeholder("changeme"));
        assert!(!is_placeholder("sk-proj-4f9a8b7c6d"));
        assert!(!is_placeholder("AIzaSyD-example123"));
    }

    #[test]
    fn test_model_resolution_order() {
        let mut settings = ProviderSettings::default();
        assert_eq!(
            settings.model_for(ProviderKind::Claude, Tier::Fast),
            "claude-3-5-haiku-20241022"
        );

        settings.default_model = Some("claude-3-opus".into());
        assert_eq!(settings.model_for(ProviderKind::Claude, Tier::Fast), "claude-3-opus");

        settings.model_mapping.fast = Some("claude-haiku-x".into());
        assert_eq!(settings.model_for(ProviderKind::Claude, Tier::Fast), "claude-haiku-x");
        assert_eq!(settings.model_for(ProviderKind::Claude, Tier::Powerful), "claude-3-opus");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-live"),
            ("OPENAI_MODEL_POWERFUL", "gpt-4.1"),
            ("OPENAI_TIMEOUT_SECS", "30"),
            ("GEMINI_API_KEY", "ignored-for-openai"),
        ]
        .into_iter()
        .collect();

        let mut settings = ProviderSettings::default();
        settings.apply_overrides(ProviderKind::OpenAi, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(settings.api_key.as_deref(), Some("sk-live"));
        assert_eq!(settings.model_for(ProviderKind::OpenAi, Tier::Powerful), "gpt-4.1");
        assert_eq!(settings.timeout(ProviderKind::OpenAi), Duration::from_secs(30));
    }

    #[test]
    fn test_require_api_key_errors_are_config_errors() {
        let settings = ProviderSettings {
            api_key: Some("YOUR_GEMINI_API_KEY_HERE".into()),
            ..Default::default()
        };
        let err = settings.require_api_key(ProviderKind::Gemini).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let missing = ProviderSettings::default();
        assert!(matches!(
            missing.require_api_key(ProviderKind::Claude),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_load_json_and_yaml_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("claude_config.json"),
            r#"{"api_key": "sk-ant-123", "model_mapping": {"fast": "claude-3-5-haiku-latest"},
                "pricing": {"claude-3-5-haiku-latest": {"input_per_1m": 0.8, "output_per_1m": 4.0}}}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("gemini_config.yaml"),
            "api_key: AIza-test\ndefault_model: gemini-2.0-flash\n",
        )
        .unwrap();

        let claude = ProviderSettings::from_file(&dir.path().join("claude_config.json")).unwrap();
        assert_eq!(claude.pricing.len(), 1);
        assert_eq!(
            claude.model_for(ProviderKind::Claude, Tier::Fast),
            "claude-3-5-haiku-latest"
        );

        let gemini = ProviderSettings::from_file(&dir.path().join("gemini_config.yaml")).unwrap();
        assert_eq!(gemini.model_for(ProviderKind::Gemini, Tier::Fast), "gemini-2.0-flash");
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("openai_config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            ProviderSettings::from_file(&path),
            Err(Error::Config(_))
        ));
    }
}
