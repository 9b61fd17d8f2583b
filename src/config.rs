//! Credential file
//!
//! ```toml
//! [general]
//! app_key = "..."
//! app_secret = "..."
//! # written after the one-time authorization grant
//! refresh_token = "..."
//! ```

use std::{fs, path::Path};

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Format as _, Toml},
};
use serde::{Deserialize, Serialize};

/// Contents of the credential file
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub general: Credentials,
}

/// Dropbox app identity and the tokens granted to it
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Credentials {
    pub app_key: String,
    pub app_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl Credentials {
    /// Whether the account has been authorized already
    pub fn is_authorized(&self) -> bool {
        self.refresh_token.is_some() || self.access_token.is_some()
    }
}

impl Config {
    /// Try loading the configuration from a toml file
    pub fn try_load(path: &Path) -> Result<Self> {
        Figment::new()
            .merge(Toml::file(path))
            .extract()
            .with_context(|| format!("invalid configuration in {}", path.display()))
    }

    /// Write the configuration back to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn loads_unauthorized_config() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("webcam.toml");
        fs::write(&path, "[general]\napp_key = \"key\"\napp_secret = \"secret\"\n").unwrap();

        let config = Config::try_load(&path).unwrap();
        assert_eq!(config.general.app_key, "key");
        assert_eq!(config.general.app_secret, "secret");
        assert!(!config.general.is_authorized());
    }

    #[test]
    fn missing_app_secret_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("webcam.toml");
        fs::write(&path, "[general]\napp_key = \"key\"\n").unwrap();

        assert!(Config::try_load(&path).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        assert!(Config::try_load(&tmp.path().join("nope.toml")).is_err());
    }

    #[test]
    fn saved_tokens_are_loaded_again() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("webcam.toml");
        let config = Config {
            general: Credentials {
                app_key: "key".into(),
                app_secret: "secret".into(),
                refresh_token: Some("refresh".into()),
                access_token: None,
            },
        };

        config.save(&path).unwrap();
        let loaded = Config::try_load(&path).unwrap();

        assert!(loaded.general.is_authorized());
        assert_eq!(loaded.general.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(loaded.general.access_token, None);
    }
}
