//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Upgrade candidate selection.
//!
//! Given the installed entry of an app and every catalog entry with the same
//! id, pick the newest entry the host may upgrade to:
//! - only entries ordered after the installed one are considered
//! - an entry demanding a newer installed version first
//!   (`required_app_version_upgrade`) is passed over
//! - while container prudence is active, container entries without a known
//!   working migration are passed over
//! - an entry the host lacks install permission for is kept as a fallback
//!   and the search goes on

use crate::app::App;
use crate::installed::InstallPermissions;
use crate::version::LooseVersion;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

/// Outcome of a successful candidate search
#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    /// The newest entry that may be installed
    Eligible(Arc<App>),
    /// No permitted entry exists; this is the newest one that would have
    /// been chosen otherwise
    NotPermitted(Arc<App>),
}

impl Candidate {
    pub fn app(&self) -> &Arc<App> {
        match self {
            Candidate::Eligible(app) | Candidate::NotPermitted(app) => app,
        }
    }

    pub fn is_eligible(&self) -> bool {
        matches!(self, Candidate::Eligible(_))
    }
}

#[derive(Clone, Copy)]
pub struct CandidateSelector<'a> {
    prevent_docker: bool,
    permissions: &'a dyn InstallPermissions,
}

impl<'a> CandidateSelector<'a> {
    /// `prevent_docker` turns on container migration prudence
    pub fn new(prevent_docker: bool, permissions: &'a dyn InstallPermissions) -> Self {
        CandidateSelector {
            prevent_docker,
            permissions,
        }
    }

    fn migration_blocked(&self, current: &App, candidate: &App) -> bool {
        // an app already running in a container has nothing left to migrate
        let prevent = self.prevent_docker && !current.docker();
        prevent
            && candidate.docker()
            && !candidate.docker_migration_works
            && candidate.docker_migration_link.is_none()
    }

    /// Pick the upgrade target for `current` among `versions`.
    ///
    /// `versions` are all entries sharing `current.id`, in any order.
    pub fn select(&self, current: &App, versions: &[Arc<App>]) -> Option<Candidate> {
        let installed_version = LooseVersion::new(&current.version);
        let mut newest_first: Vec<&Arc<App>> = versions.iter().collect();
        newest_first.sort_by(|a, b| b.catalog_cmp(a));

        let mut not_permitted = None;
        for candidate in newest_first {
            if self.migration_blocked(current, candidate) {
                debug!("{} needs a container migration, skipping", candidate);
                continue;
            }
            if candidate.catalog_cmp(current) != Ordering::Greater {
                break;
            }
            if let Some(required) = &candidate.required_app_version_upgrade {
                if LooseVersion::new(required) > installed_version {
                    debug!(
                        "{} requires {} to be installed first, skipping",
                        candidate, required
                    );
                    continue;
                }
            }
            if !candidate.install_permissions_exist(self.permissions) {
                not_permitted.get_or_insert_with(|| Arc::clone(candidate));
                continue;
            }
            return Some(Candidate::Eligible(Arc::clone(candidate)));
        }
        not_permitted.map(Candidate::NotPermitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installed::{NoLicenseCheck, StaticRegistry};

    fn versions(specs: &[(&str, Option<&str>)]) -> Vec<Arc<App>> {
        specs
            .iter()
            .map(|(version, required)| {
                let mut app = App::new("d", version);
                app.required_app_version_upgrade = required.map(str::to_string);
                Arc::new(app)
            })
            .collect()
    }

    #[test]
    fn test_newest_newer_entry_wins() {
        let all = versions(&[("1.0", None), ("2.0", None), ("1.1", None)]);
        let selector = CandidateSelector::new(false, &NoLicenseCheck);
        let candidate = selector.select(&all[0], &all).unwrap();
        assert_eq!(candidate, Candidate::Eligible(Arc::clone(&all[1])));

        assert_eq!(selector.select(&all[1], &all), None);
    }

    #[test]
    fn test_required_app_version_upgrade_gates_candidates() {
        let all = versions(&[("3.0", None), ("3.5", None), ("4.0", Some("5.0"))]);
        let selector = CandidateSelector::new(false, &NoLicenseCheck);
        let candidate = selector.select(&all[0], &all).unwrap();
        assert_eq!(candidate.app().version, "3.5");

        // once 3.5 is installed, 4.0 is still out of reach
        assert_eq!(selector.select(&all[1], &all), None);

        let reachable = versions(&[("3.0", None), ("4.0", Some("3.0"))]);
        assert_eq!(
            selector.select(&reachable[0], &reachable).unwrap().app().version,
            "4.0"
        );
    }

    #[test]
    fn test_not_permitted_is_a_fallback() {
        let mut all = versions(&[("1.0", None), ("2.0", None), ("3.0", None)]);
        for app in all.iter_mut().skip(1) {
            let app = Arc::make_mut(app);
            app.install_permissions = true;
            app.docker_image = Some(format!("vendor/d:{}", app.version));
        }
        let denied_all = StaticRegistry::new().deny("d", "2.0").deny("d", "3.0");
        let selector = CandidateSelector::new(false, &denied_all);
        let candidate = selector.select(&all[0], &all).unwrap();
        assert!(!candidate.is_eligible());
        assert_eq!(candidate.app().version, "3.0");

        let denied_newest = StaticRegistry::new().deny("d", "3.0");
        let selector = CandidateSelector::new(false, &denied_newest);
        assert_eq!(
            selector.select(&all[0], &all),
            Some(Candidate::Eligible(Arc::clone(&all[1])))
        );
    }

    #[test]
    fn test_docker_prudence() {
        let mut all = versions(&[("1.0", None), ("2.0", None), ("3.0", None)]);
        Arc::make_mut(&mut all[2]).docker_image = Some("vendor/d:3.0".to_string());

        let careful = CandidateSelector::new(true, &NoLicenseCheck);
        assert_eq!(careful.select(&all[0], &all).unwrap().app().version, "2.0");

        let relaxed = CandidateSelector::new(false, &NoLicenseCheck);
        assert_eq!(relaxed.select(&all[0], &all).unwrap().app().version, "3.0");

        Arc::make_mut(&mut all[2]).docker_migration_link = Some("https://example.com".to_string());
        assert_eq!(careful.select(&all[0], &all).unwrap().app().version, "3.0");

        // prudence does not apply to apps already in a container
        let mut blocked = versions(&[("1.0", None), ("2.0", None)]);
        Arc::make_mut(&mut blocked[0]).docker_image = Some("vendor/d:1.0".to_string());
        Arc::make_mut(&mut blocked[1]).docker_image = Some("vendor/d:2.0".to_string());
        assert_eq!(careful.select(&blocked[0], &blocked).unwrap().app().version, "2.0");
    }
}
