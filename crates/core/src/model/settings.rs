use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::model::course::normalize_optional;

pub const DEFAULT_TEMP_ACCESS_HOURS: u32 = 24;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SettingsError {
    #[error("site name cannot be empty")]
    EmptySiteName,
    #[error("invalid {field} URL")]
    InvalidUrl { field: &'static str },
    #[error("temporary access must last between 1 and 720 hours")]
    InvalidTempAccessHours,
}

/// Admin-editable portal configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalSettings {
    site_name: String,
    #[serde(default)]
    support_email: Option<String>,
    #[serde(default)]
    sponsor_link: Option<String>,
    #[serde(default)]
    ai_api_key: Option<String>,
    #[serde(default)]
    ai_model: Option<String>,
    #[serde(default)]
    ai_base_url: Option<String>,
    #[serde(default)]
    ai_system_prompt: Option<String>,
    #[serde(default = "default_temp_access_hours")]
    temp_access_hours: u32,
}

fn default_temp_access_hours() -> u32 {
    DEFAULT_TEMP_ACCESS_HOURS
}

#[derive(Clone, Debug, Default)]
pub struct PortalSettingsDraft {
    pub site_name: String,
    pub support_email: Option<String>,
    pub sponsor_link: Option<String>,
    pub ai_api_key: Option<String>,
    pub ai_model: Option<String>,
    pub ai_base_url: Option<String>,
    pub ai_system_prompt: Option<String>,
    pub temp_access_hours: Option<u32>,
}

impl PortalSettingsDraft {
    /// Validate and normalize the draft into persisted settings.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` for a blank site name, an unparsable URL, or
    /// an out-of-range temporary access window.
    pub fn validate(self) -> Result<PortalSettings, SettingsError> {
        let site_name = self.site_name.trim().to_string();
        if site_name.is_empty() {
            return Err(SettingsError::EmptySiteName);
        }
        let sponsor_link = normalize_optional(self.sponsor_link);
        let ai_base_url = normalize_optional(self.ai_base_url);
        check_url(sponsor_link.as_deref(), "sponsor link")?;
        check_url(ai_base_url.as_deref(), "AI base")?;

        let temp_access_hours = self.temp_access_hours.unwrap_or(DEFAULT_TEMP_ACCESS_HOURS);
        if !(1..=720).contains(&temp_access_hours) {
            return Err(SettingsError::InvalidTempAccessHours);
        }

        Ok(PortalSettings {
            site_name,
            support_email: normalize_optional(self.support_email),
            sponsor_link,
            ai_api_key: normalize_optional(self.ai_api_key),
            ai_model: normalize_optional(self.ai_model),
            ai_base_url,
            ai_system_prompt: normalize_optional(self.ai_system_prompt),
            temp_access_hours,
        })
    }
}

fn check_url(value: Option<&str>, field: &'static str) -> Result<(), SettingsError> {
    if let Some(raw) = value {
        let parsed = Url::parse(raw).map_err(|_| SettingsError::InvalidUrl { field })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SettingsError::InvalidUrl { field });
        }
    }
    Ok(())
}

impl PortalSettings {
    #[must_use]
    pub fn site_name(&self) -> &str {
        &self.site_name
    }

    #[must_use]
    pub fn support_email(&self) -> Option<&str> {
        self.support_email.as_deref()
    }

    #[must_use]
    pub fn sponsor_link(&self) -> Option<&str> {
        self.sponsor_link.as_deref()
    }

    #[must_use]
    pub fn ai_api_key(&self) -> Option<&str> {
        self.ai_api_key.as_deref()
    }

    #[must_use]
    pub fn ai_model(&self) -> Option<&str> {
        self.ai_model.as_deref()
    }

    #[must_use]
    pub fn ai_base_url(&self) -> Option<&str> {
        self.ai_base_url.as_deref()
    }

    #[must_use]
    pub fn ai_system_prompt(&self) -> Option<&str> {
        self.ai_system_prompt.as_deref()
    }

    #[must_use]
    pub fn temp_access_hours(&self) -> u32 {
        self.temp_access_hours
    }

    #[must_use]
    pub fn to_draft(&self) -> PortalSettingsDraft {
        PortalSettingsDraft {
            site_name: self.site_name.clone(),
            support_email: self.support_email.clone(),
            sponsor_link: self.sponsor_link.clone(),
            ai_api_key: self.ai_api_key.clone(),
            ai_model: self.ai_model.clone(),
            ai_base_url: self.ai_base_url.clone(),
            ai_system_prompt: self.ai_system_prompt.clone(),
            temp_access_hours: Some(self.temp_access_hours),
        }
    }
}

impl Default for PortalSettings {
    fn default() -> Self {
        Self {
            site_name: "Learning Portal".into(),
            support_email: None,
            sponsor_link: None,
            ai_api_key: None,
            ai_model: None,
            ai_base_url: None,
            ai_system_prompt: None,
            temp_access_hours: DEFAULT_TEMP_ACCESS_HOURS,
        }
    }
}
