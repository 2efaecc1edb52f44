use std::env;
use std::time::Duration;

use portal_core::model::PortalSettings;

use crate::error::ConfigError;

pub const DEFAULT_DB_URL: &str = "sqlite://portal.sqlite3";
pub const DEFAULT_AI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_AI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_AUTOSAVE_MS: u64 = 2_000;
pub const DEFAULT_AI_QUESTION_COUNT: usize = 10;

/// Endpoint and credentials for an OpenAI-compatible chat completions API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl AiConfig {
    /// Merge admin settings over the environment.
    ///
    /// An API key stored in settings wins; model and base URL fall back to the
    /// environment, then to defaults.
    #[must_use]
    pub fn resolve(env: Option<&AiConfig>, settings: &PortalSettings) -> Option<Self> {
        let api_key = settings
            .ai_api_key()
            .map(str::to_string)
            .or_else(|| env.map(|c| c.api_key.clone()))?;
        let base_url = settings
            .ai_base_url()
            .map(str::to_string)
            .or_else(|| env.map(|c| c.base_url.clone()))
            .unwrap_or_else(|| DEFAULT_AI_BASE_URL.into());
        let model = settings
            .ai_model()
            .map(str::to_string)
            .or_else(|| env.map(|c| c.model.clone()))
            .unwrap_or_else(|| DEFAULT_AI_MODEL.into());
        Some(Self {
            base_url,
            api_key,
            model,
        })
    }
}

#[derive(Clone, Debug)]
pub struct PortalConfig {
    pub db_url: String,
    pub ai: Option<AiConfig>,
    pub autosave_delay: Duration,
    pub ai_question_count: usize,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            db_url: DEFAULT_DB_URL.into(),
            ai: None,
            autosave_delay: Duration::from_millis(DEFAULT_AUTOSAVE_MS),
            ai_question_count: DEFAULT_AI_QUESTION_COUNT,
        }
    }
}

impl PortalConfig {
    /// Read `PORTAL_*` variables, after loading `.env` when present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a numeric variable does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let value = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let db_url = value("PORTAL_DB_URL").unwrap_or_else(|| DEFAULT_DB_URL.into());
        let ai = value("PORTAL_AI_API_KEY").map(|api_key| AiConfig {
            base_url: value("PORTAL_AI_BASE_URL").unwrap_or_else(|| DEFAULT_AI_BASE_URL.into()),
            api_key: api_key.trim().to_string(),
            model: value("PORTAL_AI_MODEL").unwrap_or_else(|| DEFAULT_AI_MODEL.into()),
        });
        let autosave_ms = parse_positive(value("PORTAL_AUTOSAVE_MS"), "PORTAL_AUTOSAVE_MS")?
            .unwrap_or(DEFAULT_AUTOSAVE_MS);
        let ai_question_count =
            parse_positive(value("PORTAL_AI_QUESTION_COUNT"), "PORTAL_AI_QUESTION_COUNT")?
                .map_or(DEFAULT_AI_QUESTION_COUNT, |n| {
                    usize::try_from(n).unwrap_or(DEFAULT_AI_QUESTION_COUNT)
                });

        Ok(Self {
            db_url,
            ai,
            autosave_delay: Duration::from_millis(autosave_ms),
            ai_question_count,
        })
    }
}

fn parse_positive(raw: Option<String>, var: &'static str) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(Some(n)),
        _ => Err(ConfigError::InvalidNumber { var, raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_core::model::PortalSettingsDraft;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_without_variables() {
        let config = PortalConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.db_url, DEFAULT_DB_URL);
        assert!(config.ai.is_none());
        assert_eq!(config.autosave_delay, Duration::from_secs(2));
        assert_eq!(config.ai_question_count, 10);
    }

    #[test]
    fn reads_ai_and_numbers() {
        let config = PortalConfig::from_lookup(lookup(&[
            ("PORTAL_AI_API_KEY", " sk-test "),
            ("PORTAL_AI_MODEL", "local-model"),
            ("PORTAL_AUTOSAVE_MS", "500"),
        ]))
        .unwrap();
        let ai = config.ai.unwrap();
        assert_eq!(ai.api_key, "sk-test");
        assert_eq!(ai.model, "local-model");
        assert_eq!(ai.base_url, DEFAULT_AI_BASE_URL);
        assert_eq!(config.autosave_delay, Duration::from_millis(500));
    }

    #[test]
    fn rejects_bad_numbers() {
        let err = PortalConfig::from_lookup(lookup(&[("PORTAL_AI_QUESTION_COUNT", "0")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidNumber {
                var: "PORTAL_AI_QUESTION_COUNT",
                raw: "0".into()
            }
        );
    }

    #[test]
    fn settings_override_environment() {
        let env = AiConfig {
            base_url: "https://env.example/v1".into(),
            api_key: "env-key".into(),
            model: "env-model".into(),
        };
        let settings = PortalSettingsDraft {
            site_name: "Portal".into(),
            ai_api_key: Some("settings-key".into()),
            ..PortalSettingsDraft::default()
        }
        .validate()
        .unwrap();
        let resolved = AiConfig::resolve(Some(&env), &settings).unwrap();
        assert_eq!(resolved.api_key, "settings-key");
        assert_eq!(resolved.model, "env-model");

        assert!(AiConfig::resolve(None, &PortalSettings::default()).is_none());
    }
}
