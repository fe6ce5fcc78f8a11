//! Client configuration.
//!
//! `FirebaseOptions` uses the same keys as the configuration object the
//! Firebase console hands out for web and Android apps, so an exported
//! config can be deserialized as-is.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading `FirebaseOptions`.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    Missing(&'static str),
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Identifies a Firebase project and the endpoints of its services.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirebaseOptions {
    pub api_key: String,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_domain: Option<String>,
    #[serde(default, rename = "databaseURL", skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messaging_sender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement_id: Option<String>,
}

impl FirebaseOptions {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Reads `FIREBASE_API_KEY` and `FIREBASE_PROJECT_ID` (required) and the
    /// optional `FIREBASE_AUTH_DOMAIN`, `FIREBASE_DATABASE_URL`,
    /// `FIREBASE_STORAGE_BUCKET`, `FIREBASE_MESSAGING_SENDER_ID`,
    /// `FIREBASE_APP_ID` and `FIREBASE_MEASUREMENT_ID`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| lookup(key).ok_or(ConfigError::Missing(key));

        let options = Self {
            api_key: required("FIREBASE_API_KEY")?,
            project_id: required("FIREBASE_PROJECT_ID")?,
            auth_domain: lookup("FIREBASE_AUTH_DOMAIN"),
            database_url: lookup("FIREBASE_DATABASE_URL"),
            storage_bucket: lookup("FIREBASE_STORAGE_BUCKET"),
            messaging_sender_id: lookup("FIREBASE_MESSAGING_SENDER_ID"),
            app_id: lookup("FIREBASE_APP_ID"),
            measurement_id: lookup("FIREBASE_MEASUREMENT_ID"),
        };
        options.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Missing("apiKey"));
        }
        if self.project_id.trim().is_empty() {
            return Err(ConfigError::Missing("projectId"));
        }
        Ok(self)
    }

    /// The Realtime Database URL, defaulting to `https://<project>-default-rtdb.firebaseio.com`.
    pub fn database_url(&self) -> String {
        match &self.database_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}-default-rtdb.firebaseio.com", self.project_id),
        }
    }

    /// The default Storage bucket, defaulting to `<project>.appspot.com`.
    pub fn storage_bucket(&self) -> String {
        self.storage_bucket
            .clone()
            .unwrap_or_else(|| format!("{}.appspot.com", self.project_id))
    }
}
