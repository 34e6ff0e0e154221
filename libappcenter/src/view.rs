//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Filtered, installation-aware queries over a [`FederatedCatalog`].

use crate::app::App;
use crate::cache::{FederatedCatalog, Result};
use crate::candidate::{Candidate, CandidateSelector};
use crate::installed::{InstallPermissions, InstalledRegistry, NoLicenseCheck};
use std::collections::BTreeSet;
use std::sync::Arc;
use strum::{Display, EnumString};
use tracing::instrument;

/// Which catalog entries a view shows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum ViewFilter {
    /// Entries usable on the running platform version
    #[default]
    Apps,
    /// Every entry of every compatible platform version
    AllApps,
}

impl ViewFilter {
    pub fn includes(&self, app: &App, current_version: &str) -> bool {
        match self {
            ViewFilter::Apps => app.supports_ucs_version(current_version),
            ViewFilter::AllApps => true,
        }
    }
}

pub struct CatalogView {
    catalog: Arc<FederatedCatalog>,
    filter: ViewFilter,
    installed: Arc<dyn InstalledRegistry>,
    permissions: Arc<dyn InstallPermissions>,
}

impl std::fmt::Debug for CatalogView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogView")
            .field("catalog", &self.catalog)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl CatalogView {
    pub fn new(
        catalog: Arc<FederatedCatalog>,
        filter: ViewFilter,
        installed: Arc<dyn InstalledRegistry>,
    ) -> Self {
        CatalogView {
            catalog,
            filter,
            installed,
            permissions: Arc::new(NoLicenseCheck),
        }
    }

    /// Use `permissions` for licensed container apps
    pub fn with_permissions(mut self, permissions: Arc<dyn InstallPermissions>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn catalog(&self) -> &Arc<FederatedCatalog> {
        &self.catalog
    }

    pub fn filter(&self) -> ViewFilter {
        self.filter
    }

    pub fn installed(&self) -> &dyn InstalledRegistry {
        self.installed.as_ref()
    }

    pub fn permissions(&self) -> &dyn InstallPermissions {
        self.permissions.as_ref()
    }

    pub fn is_installed(&self, app: &App) -> bool {
        app.is_installed(self.installed.as_ref())
    }

    /// Every entry passing the filter, sorted
    pub fn get_every_single_app(&self) -> Result<Vec<Arc<App>>> {
        let current = self.catalog.resolve_current_version();
        let apps = self.catalog.get_every_single_app()?;
        Ok(apps
            .into_iter()
            .filter(|app| self.filter.includes(app, &current))
            .collect())
    }

    /// All entries of one app, oldest first
    pub fn get_all_apps_with_id(&self, app_id: &str) -> Result<Vec<Arc<App>>> {
        Ok(self
            .get_every_single_app()?
            .into_iter()
            .filter(|app| app.id == app_id)
            .collect())
    }

    /// One entry per app id, as [`CatalogView::find`] picks it
    pub fn get_all_apps(&self) -> Result<Vec<Arc<App>>> {
        let apps = self.get_every_single_app()?;
        let ids: BTreeSet<&str> = apps.iter().map(|app| app.id.as_str()).collect();
        Ok(ids
            .into_iter()
            .filter_map(|id| self.pick(&apps, id, None, false))
            .collect())
    }

    pub fn get_all_locally_installed_apps(&self) -> Result<Vec<Arc<App>>> {
        Ok(self
            .get_every_single_app()?
            .into_iter()
            .filter(|app| self.is_installed(app))
            .collect())
    }

    fn pick(
        &self,
        apps: &[Arc<App>],
        app_id: &str,
        version: Option<&str>,
        latest: bool,
    ) -> Option<Arc<App>> {
        // newest first, so a version shipped for several platform versions
        // resolves to its newest copy
        let mut versions = apps.iter().rev().filter(|app| app.id == app_id);
        if let Some(version) = version {
            return versions.find(|app| app.version == version).cloned();
        }
        if latest {
            return versions.next().cloned();
        }
        let versions: Vec<&Arc<App>> = versions.collect();
        versions
            .iter()
            .find(|app| self.is_installed(app))
            .or_else(|| versions.first())
            .map(|app| Arc::clone(app))
    }

    /// Look up an app.
    ///
    /// With `version`, only that exact version is returned. Otherwise the
    /// installed entry wins unless `latest` is set, then the newest one.
    #[instrument(level = "debug", skip(self))]
    pub fn find(&self, app_id: &str, version: Option<&str>, latest: bool) -> Result<Option<Arc<App>>> {
        Ok(self.pick(&self.get_every_single_app()?, app_id, version, latest))
    }

    pub fn find_by_component_id(&self, component_id: &str) -> Result<Option<Arc<App>>> {
        Ok(self
            .get_every_single_app()?
            .into_iter()
            .find(|app| app.component_id == component_id))
    }

    /// The entry `app` should be upgraded to, if any
    pub fn find_candidate(&self, app: &App) -> Result<Option<Candidate>> {
        let prevent_docker = self.catalog.config().docker_prudence_for(app);
        let versions = self.get_all_apps_with_id(&app.id)?;
        Ok(CandidateSelector::new(prevent_docker, self.permissions.as_ref()).select(app, &versions))
    }

    /// Entries installed on this host that list `app_id` in their
    /// required apps
    pub fn dependents_of(&self, app_id: &str) -> Result<Vec<Arc<App>>> {
        Ok(self
            .get_all_locally_installed_apps()?
            .into_iter()
            .filter(|app| app.required_apps.iter().any(|id| id == app_id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheRegistry;
    use crate::config::AppCenterConfig;
    use crate::installed::StaticRegistry;
    use std::fs;
    use std::str::FromStr;
    use tempfile::{tempdir, TempDir};

    fn write(dir: &std::path::Path, component: &str, body: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(format!("{}.ini", component)), body).unwrap();
    }

    fn fixture(dir: &TempDir) -> AppCenterConfig {
        let config = AppCenterConfig {
            ucs_version: "5.0".to_string(),
            ..AppCenterConfig::with_cache_root(dir.path())
        };
        let server_dir = config.server_dir().unwrap();
        let v50 = server_dir.join("5.0");
        let v44 = server_dir.join("4.4");
        write(&v50, "mail_1", "[Application]\nID=mail\nCode=MA\nName=Mail\nVersion=1.0\n");
        write(&v50, "mail_2", "[Application]\nID=mail\nCode=MA\nName=Mail\nVersion=2.0\n");
        write(
            &v50,
            "spam_1",
            "[Application]\nID=spam\nCode=SP\nName=Spam\nVersion=0.9\nRequiredApps=mail\n",
        );
        write(
            &v44,
            "legacy_1",
            "[Application]\nID=legacy\nCode=LE\nName=Legacy\nVersion=1.0\n",
        );
        write(
            &v44,
            "bridge_1",
            "[Application]\nID=bridge\nCode=BR\nName=Bridge\nVersion=1.0\nSupportedUCSVersions=4.4-0, 5.0-0\n",
        );
        fs::write(
            server_dir.join("ucs.ini"),
            "[5.0]\nSupportedUCSVersions = 5.0, 4.4\n",
        )
        .unwrap();
        config
    }

    fn view(config: &AppCenterConfig, filter: ViewFilter, installed: StaticRegistry) -> CatalogView {
        let registry = CacheRegistry::from_config(config);
        CatalogView::new(registry.federated(config).unwrap(), filter, Arc::new(installed))
    }

    fn names(apps: &[Arc<App>]) -> Vec<String> {
        apps.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn test_filters() {
        let dir = tempdir().unwrap();
        let config = fixture(&dir);

        let apps = view(&config, ViewFilter::Apps, StaticRegistry::new());
        assert_eq!(
            names(&apps.get_every_single_app().unwrap()),
            vec!["bridge=1.0", "mail=1.0", "mail=2.0", "spam=0.9"]
        );

        let all = view(&config, ViewFilter::AllApps, StaticRegistry::new());
        assert_eq!(all.get_every_single_app().unwrap().len(), 5);

        assert_eq!(ViewFilter::from_str("all-apps").unwrap(), ViewFilter::AllApps);
        assert_eq!(ViewFilter::Apps.to_string(), "apps");
    }

    #[test]
    fn test_find_and_lookups() {
        let dir = tempdir().unwrap();
        let config = fixture(&dir);
        let installed = StaticRegistry::new()
            .with_installed("mail", "1.0")
            .with_installed("spam", "0.9");
        let view = view(&config, ViewFilter::Apps, installed);

        assert_eq!(view.find("mail", None, false).unwrap().unwrap().version, "1.0");
        assert_eq!(view.find("mail", None, true).unwrap().unwrap().version, "2.0");
        assert_eq!(view.find("mail", Some("2.0"), false).unwrap().unwrap().version, "2.0");
        assert!(view.find("mail", Some("3.0"), false).unwrap().is_none());
        assert!(view.find("nothing", None, false).unwrap().is_none());

        assert_eq!(
            names(&view.get_all_apps().unwrap()),
            vec!["bridge=1.0", "mail=1.0", "spam=0.9"]
        );
        assert_eq!(
            names(&view.get_all_locally_installed_apps().unwrap()),
            vec!["mail=1.0", "spam=0.9"]
        );
        assert_eq!(names(&view.get_all_apps_with_id("mail").unwrap()), vec!["mail=1.0", "mail=2.0"]);
        assert_eq!(
            view.find_by_component_id("mail_2").unwrap().unwrap().version,
            "2.0"
        );
        assert_eq!(names(&view.dependents_of("mail").unwrap()), vec!["spam=0.9"]);
        assert!(view.dependents_of("spam").unwrap().is_empty());

        let current = view.find("mail", None, false).unwrap().unwrap();
        let candidate = view.find_candidate(&current).unwrap().unwrap();
        assert_eq!(candidate, Candidate::Eligible(view.find("mail", None, true).unwrap().unwrap()));
    }

    #[test]
    fn test_same_version_in_two_platform_catalogs() {
        let dir = tempdir().unwrap();
        let config = fixture(&dir);
        let server_dir = config.server_dir().unwrap();
        let body = "[Application]\nID=x\nCode=XX\nName=X\nVersion=1.0\nSupportedUCSVersions=4.4-0, 5.0-0\n";
        write(&server_dir.join("4.4"), "x_44", body);
        write(&server_dir.join("5.0"), "x_50", body);
        let view = view(
            &config,
            ViewFilter::Apps,
            StaticRegistry::new().with_installed("x", "1.0"),
        );

        let current = view.find("x", None, false).unwrap().unwrap();
        assert_eq!(current.ucs_version, "5.0");
        assert_eq!(current.component_id, "x_50");
        let exact = view.find("x", Some("1.0"), false).unwrap().unwrap();
        assert_eq!(exact.ucs_version, "5.0");
        assert_eq!(view.find("x", None, true).unwrap().unwrap().ucs_version, "5.0");

        // the other copy of the installed version is no upgrade
        assert_eq!(view.find_candidate(&current).unwrap(), None);
    }
}
