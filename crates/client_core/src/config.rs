use std::{collections::HashMap, fs, path::Path};

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;
use url::Url;

pub const DEFAULT_SETTINGS_FILE: &str = "portal.toml";
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 2 * 1024 * 1024;
pub const DEFAULT_UPLOAD_CHUNK_BYTES: u64 = 256 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("storage API key is not configured; set STORAGE_API_KEY or APP__STORAGE_API_KEY")]
    MissingApiKey,
    #[error("invalid {setting} url '{value}': {source}")]
    InvalidUrl {
        setting: &'static str,
        value: String,
        source: url::ParseError,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    pub api_key: Option<String>,
    pub auth_domain: String,
    pub project_id: String,
    pub bucket: String,
    pub messaging_sender_id: String,
    pub app_id: String,
    pub endpoint: String,
}

impl StorageSettings {
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(ConfigError::MissingApiKey),
        }
    }

    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        parse_url("storage endpoint", &self.endpoint)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub api_base_url: String,
    pub storage: StorageSettings,
    pub max_upload_bytes: u64,
    pub upload_chunk_bytes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:3000".into(),
            storage: StorageSettings {
                api_key: None,
                auth_domain: "auth-with-6f388.firebaseapp.com".into(),
                project_id: "auth-with-6f388".into(),
                bucket: "auth-with-6f388.appspot.com".into(),
                messaging_sender_id: "470660274322".into(),
                app_id: "1:470660274322:web:ea716b88a160716a6c6e4b".into(),
                endpoint: "https://firebasestorage.googleapis.com".into(),
            },
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            upload_chunk_bytes: DEFAULT_UPLOAD_CHUNK_BYTES,
        }
    }
}

impl Settings {
    pub fn api_base_url(&self) -> Result<Url, ConfigError> {
        parse_url("api base", &self.api_base_url)
    }
}

pub fn load_settings() -> Settings {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE))
}

/// Defaults, then the flat `key = "value"` table in `path` if it exists, then
/// the process environment.
pub fn load_settings_from(path: &Path) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        apply_file_overrides(&mut settings, &raw);
    }
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());

    settings
}

pub fn apply_file_overrides(settings: &mut Settings, raw: &str) {
    let file_cfg = match toml::from_str::<HashMap<String, String>>(raw) {
        Ok(file_cfg) => file_cfg,
        Err(err) => {
            warn!(error = %err, "ignoring malformed settings file");
            return;
        }
    };

    if let Some(v) = file_cfg.get("api_base_url") {
        settings.api_base_url = v.clone();
    }
    if let Some(v) = file_cfg.get("storage_api_key") {
        settings.storage.api_key = Some(v.clone());
    }
    if let Some(v) = file_cfg.get("storage_project_id") {
        settings.storage.project_id = v.clone();
    }
    if let Some(v) = file_cfg.get("storage_bucket") {
        settings.storage.bucket = v.clone();
    }
    if let Some(v) = file_cfg.get("storage_endpoint") {
        settings.storage.endpoint = v.clone();
    }
    if let Some(v) = file_cfg.get("max_upload_bytes") {
        set_u64(&mut settings.max_upload_bytes, "max_upload_bytes", v);
    }
    if let Some(v) = file_cfg.get("upload_chunk_bytes") {
        set_u64(&mut settings.upload_chunk_bytes, "upload_chunk_bytes", v);
    }
}

pub fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("PORTAL_API_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = lookup("APP__API_BASE_URL") {
        settings.api_base_url = v;
    }

    if let Some(v) = lookup("STORAGE_API_KEY") {
        settings.storage.api_key = Some(v);
    }
    if let Some(v) = lookup("APP__STORAGE_API_KEY") {
        settings.storage.api_key = Some(v);
    }

    if let Some(v) = lookup("APP__STORAGE_PROJECT_ID") {
        settings.storage.project_id = v;
    }
    if let Some(v) = lookup("APP__STORAGE_AUTH_DOMAIN") {
        settings.storage.auth_domain = v;
    }
    if let Some(v) = lookup("APP__STORAGE_BUCKET") {
        settings.storage.bucket = v;
    }
    if let Some(v) = lookup("APP__STORAGE_MESSAGING_SENDER_ID") {
        settings.storage.messaging_sender_id = v;
    }
    if let Some(v) = lookup("APP__STORAGE_APP_ID") {
        settings.storage.app_id = v;
    }
    if let Some(v) = lookup("APP__STORAGE_ENDPOINT") {
        settings.storage.endpoint = v;
    }

    if let Some(v) = lookup("APP__MAX_UPLOAD_BYTES") {
        set_u64(&mut settings.max_upload_bytes, "APP__MAX_UPLOAD_BYTES", &v);
    }
    if let Some(v) = lookup("APP__UPLOAD_CHUNK_BYTES") {
        set_u64(&mut settings.upload_chunk_bytes, "APP__UPLOAD_CHUNK_BYTES", &v);
    }
}

fn set_u64(target: &mut u64, name: &str, raw: &str) {
    match raw.trim().parse::<u64>() {
        Ok(parsed) if parsed > 0 => *target = parsed,
        _ => warn!(setting = name, value = raw, "ignoring invalid numeric setting"),
    }
}

fn parse_url(setting: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value.trim()).map_err(|source| ConfigError::InvalidUrl {
        setting,
        value: value.to_string(),
        source,
    })
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
