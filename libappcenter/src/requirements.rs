//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Checks that must pass before apps are installed, upgraded or removed.
//!
//! Apps checked together satisfy each other: a required app in the same
//! batch is not missing, and a dependent removed in the same batch does not
//! block the removal. Conflicts within a batch are reported though.
//!
//! | check | install | upgrade | remove |
//! |---|---|---|---|
//! | not installed yet | x | | |
//! | not end of life | x | | |
//! | newer than the installed version | | x | |
//! | installed version new enough | | x | |
//! | not a vote-for-app entry | x | x | |
//! | install permission | x | x | |
//! | no conflicting apps | x | x | |
//! | no unmet dependencies | x | x | |
//! | nothing depends on it | | | x |

use crate::app::App;
use crate::cache::Result;
use crate::installed::DomainInstallations;
use crate::resolver::Action;
use crate::version::LooseVersion;
use crate::view::CatalogView;
use miette::Diagnostic;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

/// A required app that is not available
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmetDependency {
    pub id: String,
    /// Needed on some host of the domain rather than on this one
    pub in_domain: bool,
    /// Whether this host may provide it; false when it conflicts with the app
    pub local_allowed: bool,
}

impl UnmetDependency {
    fn local(id: &str) -> Self {
        UnmetDependency {
            id: id.to_string(),
            in_domain: false,
            local_allowed: true,
        }
    }
}

impl fmt::Display for UnmetDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.in_domain {
            write!(f, "{} (anywhere in the domain)", self.id)
        } else {
            write!(f, "{}", self.id)
        }
    }
}

fn joined<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// One failed check for one app
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum RequirementError {
    #[error("{app} is already installed")]
    #[diagnostic(
        code(appcenter::requirement_error::already_installed),
        help("Upgrade the app instead")
    )]
    AlreadyInstalled { app: String },

    #[error("{app} was discontinued and may not be installed anymore")]
    #[diagnostic(code(appcenter::requirement_error::end_of_life))]
    EndOfLife { app: String },

    #[error("{app} is not installable yet")]
    #[diagnostic(
        code(appcenter::requirement_error::vote_for_app),
        help("Vote for the app to make it available sooner")
    )]
    VoteForApp { app: String },

    #[error("{app} {version} needs to be bought before it can be installed")]
    #[diagnostic(
        code(appcenter::requirement_error::no_install_permission),
        help("Buy the app in the shop, then try again")
    )]
    NoInstallPermission {
        app: String,
        version: String,
        shop_url: Option<String>,
    },

    #[error("{app} is not installed or no newer version is available")]
    #[diagnostic(code(appcenter::requirement_error::no_candidate))]
    NoCandidate { app: String },

    #[error("upgrading {app} needs version {required_version} installed first")]
    #[diagnostic(
        code(appcenter::requirement_error::app_version_too_old),
        help("Upgrade to an intermediate version first")
    )]
    AppVersionTooOld {
        app: String,
        required_version: String,
    },

    #[error("{app} conflicts with {}", .conflicts.join(", "))]
    #[diagnostic(
        code(appcenter::requirement_error::conflicting_apps),
        help("Remove the conflicting apps first")
    )]
    ConflictingApps { app: String, conflicts: Vec<String> },

    #[error("{app} requires {}", joined(.missing))]
    #[diagnostic(
        code(appcenter::requirement_error::unmet_dependencies),
        help("Install the required apps first or together with it")
    )]
    UnmetDependencies {
        app: String,
        missing: Vec<UnmetDependency>,
    },

    #[error("{app} is required by {}", .dependents.join(", "))]
    #[diagnostic(
        code(appcenter::requirement_error::depended_on),
        help("Remove the dependent apps first or together with it")
    )]
    DependedOn { app: String, dependents: Vec<String> },
}

impl RequirementError {
    /// Id of the app the check failed for
    pub fn app(&self) -> &str {
        match self {
            RequirementError::AlreadyInstalled { app }
            | RequirementError::EndOfLife { app }
            | RequirementError::VoteForApp { app }
            | RequirementError::NoInstallPermission { app, .. }
            | RequirementError::NoCandidate { app }
            | RequirementError::AppVersionTooOld { app, .. }
            | RequirementError::ConflictingApps { app, .. }
            | RequirementError::UnmetDependencies { app, .. }
            | RequirementError::DependedOn { app, .. } => app,
        }
    }
}

/// Apps checked together
struct Batch<'b> {
    apps: &'b [Arc<App>],
    ids: HashSet<&'b str>,
}

impl<'b> Batch<'b> {
    fn new(apps: &'b [Arc<App>]) -> Self {
        Batch {
            apps,
            ids: apps.iter().map(|app| app.id.as_str()).collect(),
        }
    }

    /// Whether `id` is in the batch besides `app`
    fn has_other(&self, app: &App, id: &str) -> bool {
        id != app.id && self.ids.contains(id)
    }
}

pub struct RequirementChecker<'a> {
    view: &'a CatalogView,
    domain: &'a dyn DomainInstallations,
}

impl<'a> RequirementChecker<'a> {
    pub fn new(view: &'a CatalogView, domain: &'a dyn DomainInstallations) -> Self {
        RequirementChecker { view, domain }
    }

    /// Every failed check of `apps` for `action`, in batch order.
    ///
    /// An empty list means the action may go ahead.
    #[instrument(level = "debug", skip(self, apps), fields(apps = apps.len()))]
    pub fn check(&self, apps: &[Arc<App>], action: Action) -> Result<Vec<RequirementError>> {
        let catalog = self.view.get_all_apps()?;
        let batch = Batch::new(apps);
        let mut errors = Vec::new();
        for app in apps {
            match action {
                Action::Install => {
                    errors.extend(self.not_installed(app));
                    errors.extend(self.not_end_of_life(app));
                    errors.extend(self.installable(app, &catalog, &batch)?);
                }
                Action::Upgrade => {
                    errors.extend(self.has_candidate(app)?);
                    errors.extend(self.fitting_app_version(app)?);
                    errors.extend(self.installable(app, &catalog, &batch)?);
                }
                Action::Remove => errors.extend(self.not_depended_on(app, &catalog, &batch)),
            }
        }
        debug!("{} failed checks", errors.len());
        Ok(errors)
    }

    fn installed_entry(&self, app_id: &str) -> Result<Option<Arc<App>>> {
        Ok(self
            .view
            .find(app_id, None, false)?
            .filter(|entry| self.view.is_installed(entry)))
    }

    fn not_installed(&self, app: &App) -> Option<RequirementError> {
        self.view
            .is_installed(app)
            .then(|| RequirementError::AlreadyInstalled { app: app.id.clone() })
    }

    fn not_end_of_life(&self, app: &App) -> Option<RequirementError> {
        app.end_of_life
            .then(|| RequirementError::EndOfLife { app: app.id.clone() })
    }

    fn has_candidate(&self, app: &App) -> Result<Option<RequirementError>> {
        let newer = match self.installed_entry(&app.id)? {
            Some(installed) => installed.catalog_cmp(app) == Ordering::Less,
            None => false,
        };
        Ok((!newer).then(|| RequirementError::NoCandidate { app: app.id.clone() }))
    }

    fn fitting_app_version(&self, app: &App) -> Result<Option<RequirementError>> {
        let (Some(required), Some(installed)) = (
            app.required_app_version_upgrade.as_deref(),
            self.installed_entry(&app.id)?,
        ) else {
            return Ok(None);
        };
        if LooseVersion::new(required) > LooseVersion::new(&installed.version) {
            return Ok(Some(RequirementError::AppVersionTooOld {
                app: app.id.clone(),
                required_version: required.to_string(),
            }));
        }
        Ok(None)
    }

    /// Checks shared by install and upgrade
    fn installable(
        &self,
        app: &App,
        catalog: &[Arc<App>],
        batch: &Batch,
    ) -> Result<Vec<RequirementError>> {
        let mut errors = Vec::new();
        if app.vote_for_app {
            errors.push(RequirementError::VoteForApp { app: app.id.clone() });
        }
        if !app.install_permissions_exist(self.view.permissions()) {
            errors.push(RequirementError::NoInstallPermission {
                app: app.id.clone(),
                version: app.version.clone(),
                shop_url: app.shop_url.clone(),
            });
        }
        errors.extend(self.no_conflicts(app, catalog, batch));
        errors.extend(self.no_unmet_dependencies(app, catalog, batch)?);
        Ok(errors)
    }

    /// `conflicted_apps` works both ways: either side may name the other
    fn no_conflicts(&self, app: &App, catalog: &[Arc<App>], batch: &Batch) -> Option<RequirementError> {
        let conflicts_with = |other: &Arc<App>| {
            other.id != app.id
                && (app.conflicted_apps.contains(&other.id) || other.conflicted_apps.contains(&app.id))
        };
        let installed = catalog
            .iter()
            .filter(|other| !batch.has_other(app, &other.id))
            .filter(|other| conflicts_with(*other) && self.view.is_installed(other));
        let requested = batch
            .apps
            .iter()
            .filter(|other| conflicts_with(*other));
        let mut conflicts: Vec<String> = installed
            .chain(requested)
            .map(|other| other.id.clone())
            .collect();
        conflicts.sort();
        conflicts.dedup();
        (!conflicts.is_empty()).then(|| RequirementError::ConflictingApps {
            app: app.id.clone(),
            conflicts,
        })
    }

    fn no_unmet_dependencies(
        &self,
        app: &App,
        catalog: &[Arc<App>],
        batch: &Batch,
    ) -> Result<Option<RequirementError>> {
        let mut missing: Vec<UnmetDependency> = catalog
            .iter()
            .filter(|other| app.required_apps.contains(&other.id))
            .filter(|other| !self.view.is_installed(other) && !batch.has_other(app, &other.id))
            .map(|other| UnmetDependency::local(&other.id))
            .collect();

        for id in &app.required_apps_in_domain {
            if batch.has_other(app, id) {
                continue;
            }
            if self.view.find(id, None, false)?.is_none() {
                debug!("{} requires unknown app {} in the domain", app, id);
                continue;
            }
            if !self.domain.has_any_installed_instance(id) {
                missing.push(UnmetDependency {
                    id: id.clone(),
                    in_domain: true,
                    local_allowed: !app.conflicted_apps.contains(id),
                });
            }
        }

        Ok((!missing.is_empty()).then(|| RequirementError::UnmetDependencies {
            app: app.id.clone(),
            missing,
        }))
    }

    /// Local dependents always block. Domain-wide dependents only block
    /// when this host holds the last installation in the domain.
    fn not_depended_on(&self, app: &App, catalog: &[Arc<App>], batch: &Batch) -> Option<RequirementError> {
        let mut dependents: Vec<String> = catalog
            .iter()
            .filter(|other| other.required_apps.contains(&app.id) && self.view.is_installed(other))
            .map(|other| other.id.clone())
            .collect();

        let domain_dependents: Vec<&Arc<App>> = catalog
            .iter()
            .filter(|other| other.required_apps_in_domain.contains(&app.id))
            .collect();
        if !domain_dependents.is_empty() && !self.domain.has_remote_installation(&app.id) {
            dependents.extend(
                domain_dependents
                    .into_iter()
                    .filter(|other| self.domain.has_any_installed_instance(&other.id))
                    .map(|other| other.id.clone()),
            );
        }

        dependents.retain(|id| !batch.has_other(app, id));
        dependents.sort();
        dependents.dedup();
        (!dependents.is_empty()).then(|| RequirementError::DependedOn {
            app: app.id.clone(),
            dependents,
        })
    }
}
