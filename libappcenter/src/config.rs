//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use crate::app::App;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CACHE_ROOT: &str = "/var/cache/univention-appcenter";
pub const DEFAULT_SERVER: &str = "appcenter.software-univention.de";
pub const DEFAULT_UCS_VERSION: &str = "4.4";
pub const DEFAULT_LOCALE: &str = "en";
pub const DEFAULT_UPGRADE_STATUS_FILE: &str =
    "/var/lib/univention-updater/univention-updater.status";
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Error, Diagnostic, PartialEq)]
pub enum ConfigError {
    #[error("invalid App Center server: {0:?}")]
    #[diagnostic(
        code(appcenter::config_error::invalid_server),
        help("Use a host name like appcenter.example.com or a full https:// URL")
    )]
    InvalidServer(String),

    #[error("invalid platform version: {0:?}")]
    #[diagnostic(
        code(appcenter::config_error::invalid_ucs_version),
        help("Platform versions look like 4.4 or 5.0")
    )]
    InvalidUcsVersion(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Settings shared by every cache, view and selector of one process
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct AppCenterConfig {
    /// Root of all catalog caches; one directory per server below it
    pub cache_root: PathBuf,
    /// App Center server, with or without scheme
    pub server: String,
    /// Platform version of this host
    pub ucs_version: String,
    pub locale: String,
    /// Record of a running platform upgrade, `key=value` lines
    pub upgrade_status_file: Option<PathBuf>,
    /// App ids for which moving to a container version needs a working
    /// migration
    pub docker_prudence: Vec<String>,
    /// Seconds another thread waits for a busy cache
    pub lock_timeout: u64,
    /// Files whose modification invalidates every snapshot
    pub schema_sources: Vec<PathBuf>,
}

impl Default for AppCenterConfig {
    fn default() -> Self {
        AppCenterConfig {
            cache_root: PathBuf::from(DEFAULT_CACHE_ROOT),
            server: DEFAULT_SERVER.to_string(),
            ucs_version: DEFAULT_UCS_VERSION.to_string(),
            locale: DEFAULT_LOCALE.to_string(),
            upgrade_status_file: Some(PathBuf::from(DEFAULT_UPGRADE_STATUS_FILE)),
            docker_prudence: Vec::new(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT_SECS,
            schema_sources: Vec::new(),
        }
    }
}

impl AppCenterConfig {
    /// Configuration rooted at `cache_root` with every other value defaulted
    pub fn with_cache_root<P: Into<PathBuf>>(cache_root: P) -> Self {
        AppCenterConfig {
            cache_root: cache_root.into(),
            upgrade_status_file: None,
            ..AppCenterConfig::default()
        }
    }

    /// The server as a URL; bare host names get `https://`
    pub fn server_url(&self) -> String {
        let server = self.server.trim().trim_end_matches('/');
        if server.starts_with("http") {
            server.to_string()
        } else {
            format!("https://{}", server)
        }
    }

    /// The host part of the server URL
    pub fn server_host(&self) -> Result<String> {
        let url = self.server_url();
        let rest = url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(url.as_str());
        let authority = rest.split('/').next().unwrap_or_default();
        let host = authority.rsplit('@').next().unwrap_or_default();
        if host.is_empty() || host.contains(char::is_whitespace) {
            return Err(ConfigError::InvalidServer(self.server.clone()));
        }
        Ok(host.to_string())
    }

    /// Directory holding the side tables of the configured server
    pub fn server_dir(&self) -> Result<PathBuf> {
        Ok(self.cache_root.join(self.server_host()?))
    }

    /// Directory holding the descriptors of one platform version
    pub fn cache_dir(&self, ucs_version: &str) -> Result<PathBuf> {
        validate_ucs_version(ucs_version)?;
        Ok(self.server_dir()?.join(ucs_version))
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout)
    }

    /// Whether container migration prudence applies to `app`
    pub fn docker_prudence_for(&self, app: &App) -> bool {
        self.docker_prudence.iter().any(|id| {
            id == &app.id || app.plugin_of.as_deref() == Some(id.as_str())
        })
    }
}

fn validate_ucs_version(ucs_version: &str) -> Result<()> {
    let valid = ucs_version.chars().any(|c| c.is_ascii_digit())
        && ucs_version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidUcsVersion(ucs_version.to_string()))
    }
}
