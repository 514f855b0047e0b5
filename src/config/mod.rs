//! Configuration and credential storage

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::auth::StoredToken;
use crate::models::UserProfile;

/// Application configuration
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the support-desk server (e.g. https://desk.internal.example)
    pub server_url: Option<String>,
    /// Override for the real-time hub endpoint. Defaults to
    /// `{server_url}/hubs/support`.
    pub hub_url: Option<String>,
    /// Stored bearer token from the last login
    pub access_token: Option<StoredToken>,
    /// Profile of the logged-in user (id, display name, role)
    pub profile: Option<UserProfile>,
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "desk-cli", "desk-cli")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;

        // Set restrictive permissions on config file (contains tokens)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    /// REST API base URL, derived from the stored server URL.
    pub fn api_base(&self) -> Result<String> {
        let server = self
            .server_url
            .as_deref()
            .context("No server configured. Run 'desk-cli login --server <url>' first.")?;
        Ok(format!("{}/api", server.trim_end_matches('/')))
    }

    /// Real-time hub endpoint URL.
    pub fn hub_endpoint(&self) -> Result<String> {
        if let Some(ref url) = self.hub_url {
            return Ok(url.clone());
        }
        let server = self
            .server_url
            .as_deref()
            .context("No server configured. Run 'desk-cli login --server <url>' first.")?;
        Ok(format!("{}/hubs/support", server.trim_end_matches('/')))
    }

    pub fn get_access_token(&self) -> Option<StoredToken> {
        self.access_token.clone()
    }

    pub fn set_access_token(&mut self, token: String, expires_in: Option<u64>) {
        self.access_token = Some(StoredToken::new(token, expires_in));
    }

    pub fn get_profile(&self) -> Option<UserProfile> {
        self.profile.clone()
    }

    pub fn set_profile(&mut self, profile: UserProfile) {
        self.profile = Some(profile);
    }

    /// Drop all session state (logout and 401 teardown).
    pub fn clear_session(&mut self) {
        self.access_token = None;
        self.profile = None;
    }
}
