use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::workflow::schedule::FollowUpPolicy;
use crate::workflow::WorkflowSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("file access failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub bind_addr: String,
    pub token_path: Option<PathBuf>,
    /// Wall clock used for the follow-up business-hour window.
    pub utc_offset_hours: i32,
    pub skip_weekends: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
            bind_addr: "0.0.0.0:8080".to_string(),
            token_path: None,
            utc_offset_hours: 3,
            skip_weekends: true,
        }
    }
}

impl AppConfig {
    /// `<data dir>/lead-bridge`, or `./lead-bridge` when the platform has none.
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lead-bridge")
    }

    pub fn load(app_data: &Path) -> Self {
        let config_path = app_data.join("config.json");
        let mut config = if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                    log::warn!("Ignoring malformed {}: {}", config_path.display(), e);
                    Self::default()
                }),
                Err(e) => {
                    log::warn!("Cannot read {}: {}", config_path.display(), e);
                    Self::default()
                }
            }
        } else {
            let c = Self::default();
            if let Err(e) = c.save(app_data) {
                log::warn!("Cannot write default config: {}", e);
            }
            c
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    pub fn save(&self, app_data: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(app_data)?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(app_data.join("config.json"), content)?;
        Ok(())
    }

    /// Non-empty values from `lookup` replace the file values.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("CLIENT_ID") {
            self.client_id = v;
        }
        if let Some(v) = get("CLIENT_SECRET") {
            self.client_secret = v;
        }
        if let Some(v) = get("CLIENT_REDIRECT_URI") {
            self.redirect_uri = v;
        }
        if let Some(v) = get("LEAD_BRIDGE_BIND") {
            self.bind_addr = v;
        }
        if let Some(v) = get("LEAD_BRIDGE_TOKEN_PATH") {
            self.token_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("LEAD_BRIDGE_UTC_OFFSET") {
            match v.trim().parse() {
                Ok(hours) => self.utc_offset_hours = hours,
                Err(_) => log::warn!("LEAD_BRIDGE_UTC_OFFSET is not an integer: {}", v),
            }
        }
        if let Some(v) = get("LEAD_BRIDGE_SKIP_WEEKENDS") {
            match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.skip_weekends = true,
                "0" | "false" | "no" => self.skip_weekends = false,
                _ => log::warn!("LEAD_BRIDGE_SKIP_WEEKENDS is not a boolean: {}", v),
            }
        }
    }

    pub fn token_path(&self, app_data: &Path) -> PathBuf {
        self.token_path
            .clone()
            .unwrap_or_else(|| app_data.join("token.json"))
    }

    /// Falls back to UTC when the configured offset is out of range.
    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| {
                log::warn!("utc_offset_hours {} out of range, using UTC", self.utc_offset_hours);
                Utc.fix()
            })
    }

    pub fn workflow_settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            utc_offset: self.utc_offset(),
            follow_up: FollowUpPolicy {
                skip_weekends: self.skip_weekends,
                ..FollowUpPolicy::default()
            },
        }
    }
}
