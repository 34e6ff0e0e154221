//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use super::local::LocalCatalogCache;
use super::registry::LocalCaches;
use super::tables::SideTables;
use super::Result;
use crate::app::App;
use crate::config::AppCenterConfig;
use crate::installed::parse_records;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The record a platform upgrade leaves behind while it runs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeStatus {
    pub running: bool,
    /// Target version without patch level
    pub next_version: Option<String>,
}

impl UpgradeStatus {
    /// Parse `key=value` lines; `None` when the record is malformed
    pub fn parse(content: &str) -> Option<Self> {
        let records = match parse_records(content) {
            Ok(records) => records,
            Err(e) => {
                debug!("Malformed upgrade status: {}", e);
                return None;
            }
        };
        let record = records.general_section();
        Some(UpgradeStatus {
            running: record.get("status") == Some("RUNNING"),
            next_version: record
                .get("next_version")
                .and_then(|value| value.split('-').next())
                .filter(|version| !version.is_empty())
                .map(str::to_string),
        })
    }

    /// Read the record; missing or malformed records count as no upgrade
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                debug!("No upgrade status at {}: {}", path.display(), e);
                return UpgradeStatus::default();
            }
        };
        UpgradeStatus::parse(&content).unwrap_or_else(|| {
            warn!("Could not parse upgrade status {}", path.display());
            UpgradeStatus::default()
        })
    }

    /// The version being upgraded to, while an upgrade runs
    pub fn target(&self) -> Option<&str> {
        if self.running {
            self.next_version.as_deref()
        } else {
            None
        }
    }
}

/// All apps usable on this host, across compatible platform versions
#[derive(Debug)]
pub struct FederatedCatalog {
    config: AppCenterConfig,
    tables: Arc<SideTables>,
    caches: Arc<LocalCaches>,
}

impl FederatedCatalog {
    pub(crate) fn new(config: AppCenterConfig, server_dir: PathBuf, caches: Arc<LocalCaches>) -> Self {
        let tables = caches.side_tables(&server_dir);
        FederatedCatalog {
            config,
            tables,
            caches,
        }
    }

    pub fn config(&self) -> &AppCenterConfig {
        &self.config
    }

    pub fn side_tables(&self) -> &Arc<SideTables> {
        &self.tables
    }

    /// The platform version apps are chosen for.
    ///
    /// During a platform upgrade this is the target version.
    pub fn resolve_current_version(&self) -> String {
        let target = self
            .config
            .upgrade_status_file
            .as_deref()
            .map(UpgradeStatus::load)
            .and_then(|status| status.target().map(str::to_string));
        match target {
            Some(version) => {
                info!("Platform upgrade to {} running, using its catalog", version);
                version
            }
            None => self.config.ucs_version.clone(),
        }
    }

    pub fn resolve_compatible_versions(&self) -> Vec<String> {
        self.tables.compatible_versions(&self.resolve_current_version())
    }

    /// One local cache per compatible version
    pub fn local_caches(&self) -> Result<Vec<Arc<LocalCatalogCache>>> {
        self.resolve_compatible_versions()
            .iter()
            .map(|version| {
                // rejects versions that would escape the server directory
                self.config.cache_dir(version)?;
                Ok(self
                    .caches
                    .local_cache(&self.tables, version, &self.config.locale))
            })
            .collect()
    }

    /// Union of all compatible caches, sorted
    pub fn get_every_single_app(&self) -> Result<Vec<Arc<App>>> {
        let mut apps = Vec::new();
        for cache in self.local_caches()? {
            apps.extend(cache.get_every_single_app()?);
        }
        apps.sort_by(|a, b| a.catalog_cmp(b));
        Ok(apps)
    }

    /// License description of `app` in the configured locale
    pub fn license_description(&self, app: &App) -> Option<String> {
        self.tables
            .license_description(&app.license, &self.config.locale)
    }

    /// Drop the side tables and clear every compatible cache
    pub fn clear_cache(&self) -> Result<()> {
        let caches = self.local_caches()?;
        self.tables.clear();
        for cache in caches {
            cache.clear_cache()?;
        }
        Ok(())
    }
}
