//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Installation state as seen by the catalog.
//!
//! The catalog never inspects the system itself. It asks three small
//! collaborators instead: which app versions are installed on this host,
//! whether an app is installed anywhere in the domain, and whether the
//! current system may install a licensed app. File-backed implementations
//! are provided for the CLI, [`StaticRegistry`] for embedding and tests.

use crate::app::App;
use ini::{Ini, ParseOption};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur when loading installation state
#[derive(Error, Debug, Diagnostic)]
pub enum InstalledError {
    #[error("failed to read {path}: {source}")]
    #[diagnostic(
        code(appcenter::installed_error::io),
        help("Check that the file exists and is readable")
    )]
    IO {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed record in {path}: {message}")]
    #[diagnostic(
        code(appcenter::installed_error::parse),
        help("Every line needs to be `key: value` or `key=value`")
    )]
    Parse { path: PathBuf, message: String },

    #[error("JSON error in {path}: {source}")]
    #[diagnostic(
        code(appcenter::installed_error::json),
        help("The domain inventory must map host names to lists of app ids")
    )]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type for installation state operations
pub type Result<T> = std::result::Result<T, InstalledError>;

/// Parse sectionless `key=value` or `key: value` lines, taking values verbatim
pub(crate) fn parse_records(content: &str) -> std::result::Result<Ini, ini::ParseError> {
    Ini::load_from_str_opt(
        content,
        ParseOption {
            enabled_quote: false,
            enabled_escape: false,
            ..ParseOption::default()
        },
    )
}

/// Answers whether one exact app version is installed on the local host
pub trait InstalledRegistry {
    fn is_installed(&self, app_id: &str, version: &str) -> bool;
}

/// Answers whether an app is installed on any host of the domain
pub trait DomainInstallations {
    fn has_any_installed_instance(&self, app_id: &str) -> bool;

    /// Whether a host other than this one has `app_id` installed
    fn has_remote_installation(&self, app_id: &str) -> bool;
}

/// Answers whether a licensed app may be installed
pub trait InstallPermissions {
    fn has_access(&self, app: &App) -> bool;
}

/// Grants every install permission.
///
/// Used when no shop backend is available; the installer checks licenses
/// again before doing anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLicenseCheck;

impl InstallPermissions for NoLicenseCheck {
    fn has_access(&self, _app: &App) -> bool {
        true
    }
}

/// In-memory installation state
#[derive(Debug, Default, Clone)]
pub struct StaticRegistry {
    /// app id -> locally installed version
    installed: HashMap<String, String>,
    /// app ids installed on other hosts of the domain
    domain: HashSet<String>,
    /// (app id, version) pairs without install permission
    denied: HashSet<(String, String)>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `version` of `app_id` as installed locally
    pub fn with_installed(mut self, app_id: &str, version: &str) -> Self {
        self.installed.insert(app_id.to_string(), version.to_string());
        self
    }

    /// Mark `app_id` as installed somewhere else in the domain
    pub fn with_domain_installation(mut self, app_id: &str) -> Self {
        self.domain.insert(app_id.to_string());
        self
    }

    /// Withdraw the install permission for one app version
    pub fn deny(mut self, app_id: &str, version: &str) -> Self {
        self.denied.insert((app_id.to_string(), version.to_string()));
        self
    }

    pub fn installed_version(&self, app_id: &str) -> Option<&str> {
        self.installed.get(app_id).map(String::as_str)
    }
}

impl InstalledRegistry for StaticRegistry {
    fn is_installed(&self, app_id: &str, version: &str) -> bool {
        self.installed.get(app_id).map(|v| v == version).unwrap_or(false)
    }
}

impl DomainInstallations for StaticRegistry {
    fn has_any_installed_instance(&self, app_id: &str) -> bool {
        self.domain.contains(app_id) || self.installed.contains_key(app_id)
    }

    fn has_remote_installation(&self, app_id: &str) -> bool {
        self.domain.contains(app_id)
    }
}

impl InstallPermissions for StaticRegistry {
    fn has_access(&self, app: &App) -> bool {
        !self.denied.contains(&(app.id.clone(), app.version.clone()))
    }
}

/// App states as recorded in the host configuration registry.
///
/// The file holds `key: value` lines; an app counts as installed when
/// `appcenter/apps/<id>/status` is `installed` or `stalled` and
/// `appcenter/apps/<id>/version` names the version.
#[derive(Debug, Default, Clone)]
pub struct StatusFileRegistry {
    values: HashMap<String, String>,
}

impl StatusFileRegistry {
    /// Load the registry; a missing file means nothing is installed
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No status file at {}, assuming no apps installed", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| InstalledError::IO {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &content)
    }

    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        let records = parse_records(content).map_err(|e| InstalledError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let values = records
            .general_section()
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Ok(StatusFileRegistry { values })
    }

    fn status_key(app_id: &str) -> String {
        format!("appcenter/apps/{}/status", app_id)
    }

    fn version_key(app_id: &str) -> String {
        format!("appcenter/apps/{}/version", app_id)
    }

    /// The locally installed version of `app_id`, if any
    pub fn installed_version(&self, app_id: &str) -> Option<&str> {
        let status = self.values.get(&Self::status_key(app_id))?;
        if status != "installed" && status != "stalled" {
            return None;
        }
        self.values.get(&Self::version_key(app_id)).map(String::as_str)
    }
}

impl InstalledRegistry for StatusFileRegistry {
    fn is_installed(&self, app_id: &str, version: &str) -> bool {
        self.installed_version(app_id) == Some(version)
    }
}

/// Installations across the domain, keyed by host name
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DomainInventory {
    pub hosts: HashMap<String, Vec<String>>,
    /// Name of this host in `hosts`
    #[serde(skip)]
    pub local_host: Option<String>,
}

impl DomainInventory {
    /// Load the inventory; a missing file means an empty domain
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No domain inventory at {}", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| InstalledError::IO {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| InstalledError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn with_local_host(mut self, host: &str) -> Self {
        self.local_host = Some(host.to_string());
        self
    }

    /// Hosts that have `app_id` installed
    pub fn hosts_with(&self, app_id: &str) -> Vec<&str> {
        let mut hosts: Vec<&str> = self
            .hosts
            .iter()
            .filter(|(_, apps)| apps.iter().any(|a| a == app_id))
            .map(|(host, _)| host.as_str())
            .collect();
        hosts.sort_unstable();
        hosts
    }
}

impl DomainInstallations for DomainInventory {
    fn has_any_installed_instance(&self, app_id: &str) -> bool {
        self.hosts.values().any(|apps| apps.iter().any(|a| a == app_id))
    }

    fn has_remote_installation(&self, app_id: &str) -> bool {
        self.hosts_with(app_id)
            .into_iter()
            .any(|host| Some(host) != self.local_host.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;
    use tempfile::tempdir;

    #[test]
    fn test_status_file_registry() {
        let registry = StatusFileRegistry::parse(
            Path::new("base.conf"),
            "# generated\n\
             appcenter/apps/nextcloud/status: installed\n\
             appcenter/apps/nextcloud/version: 18.0.1\n\
             appcenter/apps/owncloud/status: stalled\n\
             appcenter/apps/owncloud/version: 10.0\n\
             appcenter/apps/wiki/status: removed\n\
             appcenter/apps/wiki/version: 1.0\n\
             appcenter/apps/backslash/status=installed\n\
             appcenter/apps/backslash/version = 1\\2\n",
        )
        .unwrap();

        assert!(registry.is_installed("nextcloud", "18.0.1"));
        assert!(!registry.is_installed("nextcloud", "18.0.0"));
        assert!(registry.is_installed("owncloud", "10.0"));
        assert!(!registry.is_installed("wiki", "1.0"));
        assert_eq!(registry.installed_version("wiki"), None);
        assert_eq!(registry.installed_version("nextcloud"), Some("18.0.1"));
        assert_eq!(registry.installed_version("backslash"), Some("1\\2"));

        assert!(matches!(
            StatusFileRegistry::parse(Path::new("base.conf"), "no separator here\n"),
            Err(InstalledError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_files_are_empty() {
        let dir = tempdir().unwrap();
        let registry = StatusFileRegistry::load(dir.path().join("base.conf")).unwrap();
        assert!(!registry.is_installed("anything", "1.0"));

        let inventory = DomainInventory::load(dir.path().join("domain.json")).unwrap();
        assert!(!inventory.has_any_installed_instance("anything"));
    }

    #[test]
    fn test_domain_inventory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("domain.json");
        fs::write(
            &path,
            r#"{"hosts": {"dc1": ["mail", "ldap"], "member7": ["ldap"]}}"#,
        )
        .unwrap();

        let inventory = DomainInventory::load(&path).unwrap();
        assert!(inventory.has_any_installed_instance("mail"));
        assert!(!inventory.has_any_installed_instance("wiki"));
        assert_eq!(inventory.hosts_with("ldap"), vec!["dc1", "member7"]);

        let inventory = inventory.with_local_host("dc1");
        assert!(!inventory.has_remote_installation("mail"));
        assert!(inventory.has_remote_installation("ldap"));
        assert!(!inventory.has_remote_installation("wiki"));

        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            DomainInventory::load(&path),
            Err(InstalledError::Json { .. })
        ));
    }

    #[test]
    fn test_domain_inventory_from_map() {
        let inventory = DomainInventory {
            hosts: hashmap! {
                "dc1".to_string() => vec!["mail".to_string()],
                "backup".to_string() => vec!["mail".to_string(), "wiki".to_string()],
            },
            local_host: None,
        };
        assert_eq!(inventory.hosts_with("mail"), vec!["backup", "dc1"]);
        assert_eq!(inventory.hosts_with("wiki"), vec!["backup"]);
        assert!(inventory.hosts_with("ldap").is_empty());
    }

    #[test]
    fn test_static_registry_domain_includes_local() {
        let registry = StaticRegistry::new()
            .with_installed("a", "1.0")
            .with_domain_installation("b");
        assert!(registry.has_any_installed_instance("a"));
        assert!(registry.has_any_installed_instance("b"));
        assert!(!registry.has_any_installed_instance("c"));
        assert!(!registry.has_remote_installation("a"));
        assert!(registry.has_remote_installation("b"));
        assert!(registry.is_installed("a", "1.0"));
        assert!(!registry.is_installed("b", "1.0"));
    }
}
