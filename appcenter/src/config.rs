//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! `appcenter.kdl`
//!
//! ```kdl
//! cache-root "/var/cache/univention-appcenter"
//! server "appcenter.software-univention.de"
//! ucs-version "5.0"
//! locale "de"
//! lock-timeout 30
//! docker-prudence "mail" "nextcloud"
//! status-file "/etc/univention/base.conf"
//! domain-inventory "/var/lib/univention-appcenter/domain.json"
//! hostname "dc1"
//! ```
//!
//! Every node is optional. Command line flags and their environment
//! variables override the file.

use crate::error::{self, AppCenterCliError};
use libappcenter::config::AppCenterConfig;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "/etc/univention/appcenter.kdl";
pub const DEFAULT_STATUS_FILE: &str = "/etc/univention/base.conf";

#[derive(Debug, knuffel::Decode, Clone, Default)]
pub struct ConfigFile {
    #[knuffel(child, unwrap(argument))]
    pub cache_root: Option<PathBuf>,
    #[knuffel(child, unwrap(argument))]
    pub server: Option<String>,
    #[knuffel(child, unwrap(argument))]
    pub ucs_version: Option<String>,
    #[knuffel(child, unwrap(argument))]
    pub locale: Option<String>,
    #[knuffel(child, unwrap(argument))]
    pub upgrade_status_file: Option<PathBuf>,
    /// Seconds to wait for a busy cache
    #[knuffel(child, unwrap(argument))]
    pub lock_timeout: Option<u64>,
    #[knuffel(child, unwrap(arguments))]
    pub docker_prudence: Option<Vec<String>>,
    #[knuffel(child, unwrap(arguments))]
    pub schema_sources: Option<Vec<PathBuf>>,
    /// Host configuration registry with the app states
    #[knuffel(child, unwrap(argument))]
    pub status_file: Option<PathBuf>,
    /// JSON map of host name to installed app ids
    #[knuffel(child, unwrap(argument))]
    pub domain_inventory: Option<PathBuf>,
    /// Name of this host in the domain inventory
    #[knuffel(child, unwrap(argument))]
    pub hostname: Option<String>,
}

impl ConfigFile {
    pub fn parse(path: &Path, content: &str) -> error::Result<Self> {
        knuffel::parse(&path.to_string_lossy(), content).map_err(|e| {
            AppCenterCliError::ConfigParse {
                path: path.to_path_buf(),
                message: format!("{:?}", e),
            }
        })
    }

    /// Load `path`, or the default file when it exists
    pub fn load(path: Option<&Path>) -> error::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    return Ok(ConfigFile::default());
                }
                default
            }
        };
        let content = fs::read_to_string(&path).map_err(|source| AppCenterCliError::ConfigRead {
            path: path.clone(),
            source,
        })?;
        Self::parse(&path, &content)
    }
}

/// Everything a command needs
#[derive(Debug, Clone)]
pub struct Settings {
    pub appcenter: AppCenterConfig,
    pub status_file: PathBuf,
    pub domain_inventory: Option<PathBuf>,
    pub hostname: Option<String>,
}

/// Values given on the command line or in the environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub cache_root: Option<PathBuf>,
    pub server: Option<String>,
    pub ucs_version: Option<String>,
    pub locale: Option<String>,
    pub status_file: Option<PathBuf>,
}

impl Settings {
    pub fn resolve(file: ConfigFile, overrides: Overrides) -> Self {
        let defaults = AppCenterConfig::default();
        let appcenter = AppCenterConfig {
            cache_root: overrides
                .cache_root
                .or(file.cache_root)
                .unwrap_or(defaults.cache_root),
            server: overrides.server.or(file.server).unwrap_or(defaults.server),
            ucs_version: overrides
                .ucs_version
                .or(file.ucs_version)
                .unwrap_or(defaults.ucs_version),
            locale: overrides.locale.or(file.locale).unwrap_or(defaults.locale),
            upgrade_status_file: file.upgrade_status_file.or(defaults.upgrade_status_file),
            docker_prudence: file.docker_prudence.unwrap_or_default(),
            lock_timeout: file.lock_timeout.unwrap_or(defaults.lock_timeout),
            schema_sources: file.schema_sources.unwrap_or_default(),
        };
        Settings {
            appcenter,
            status_file: overrides
                .status_file
                .or(file.status_file)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATUS_FILE)),
            domain_inventory: file.domain_inventory,
            hostname: file.hostname,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_file() {
        let file = ConfigFile::parse(
            Path::new("appcenter.kdl"),
            r#"
            cache-root "/srv/cache"
            server "https://apps.example.com"
            ucs-version "5.0"
            locale "de"
            lock-timeout 5
            docker-prudence "mail" "wiki"
            status-file "/srv/base.conf"
            hostname "dc1"
            "#,
        )
        .unwrap();
        assert_eq!(file.cache_root, Some(PathBuf::from("/srv/cache")));
        assert_eq!(file.lock_timeout, Some(5));
        assert_eq!(
            file.docker_prudence,
            Some(vec!["mail".to_string(), "wiki".to_string()])
        );

        let settings = Settings::resolve(
            file,
            Overrides {
                locale: Some("fr".to_string()),
                ..Overrides::default()
            },
        );
        assert_eq!(settings.appcenter.locale, "fr");
        assert_eq!(settings.appcenter.ucs_version, "5.0");
        assert_eq!(settings.appcenter.server_host().unwrap(), "apps.example.com");
        assert_eq!(settings.status_file, PathBuf::from("/srv/base.conf"));
        assert_eq!(settings.hostname.as_deref(), Some("dc1"));
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let file = ConfigFile::parse(Path::new("appcenter.kdl"), "").unwrap();
        let settings = Settings::resolve(file, Overrides::default());
        assert_eq!(settings.appcenter, AppCenterConfig::default());
        assert_eq!(settings.status_file, PathBuf::from(DEFAULT_STATUS_FILE));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            ConfigFile::parse(Path::new("appcenter.kdl"), "lock-timeout \"soon\""),
            Err(AppCenterCliError::ConfigParse { .. })
        ));
    }
}
