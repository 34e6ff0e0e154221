//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Installation and removal ordering.
//!
//! For an install or upgrade, the requested apps are widened by every
//! required app that is not installed yet, transitively. Apps required
//! somewhere in the domain (`required_apps_in_domain`) are only pulled in
//! when no host of the domain has them. A removal never widens the set; it
//! only orders the requested apps so that dependents go first.
//!
//! The order itself comes from Kahn rounds over the entries in the order
//! they were first seen: requested apps in input order, then pulled-in apps
//! in discovery order. Resolving a resolver's own output returns it
//! unchanged.

use crate::app::App;
use crate::cache::CacheError;
use crate::installed::DomainInstallations;
use crate::view::CatalogView;
use miette::Diagnostic;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use strum::{Display, EnumString};
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Debug, Error, Diagnostic)]
pub enum ResolveError {
    #[error("dependency cycle between {}", ids.join(", "))]
    #[diagnostic(
        code(appcenter::resolve_error::dependency_cycle),
        help("The listed apps require each other; install them manually or fix their RequiredApps")
    )]
    DependencyCycle { ids: Vec<String> },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] CacheError),
}

pub type Result<T> = std::result::Result<T, ResolveError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Action {
    Install,
    Upgrade,
    Remove,
}

/// Where the resolver looks up required apps
pub trait DependencySource {
    /// The newest catalog entry of `app_id`
    fn latest(&self, app_id: &str) -> std::result::Result<Option<Arc<App>>, CacheError>;

    fn is_installed(&self, app: &App) -> bool;
}

impl DependencySource for CatalogView {
    fn latest(&self, app_id: &str) -> std::result::Result<Option<Arc<App>>, CacheError> {
        self.find(app_id, None, true)
    }

    fn is_installed(&self, app: &App) -> bool {
        CatalogView::is_installed(self, app)
    }
}

/// Entries in first-seen order plus the dependency edges between them
#[derive(Debug, Default)]
struct Graph {
    apps: Vec<Arc<App>>,
    index: HashMap<String, usize>,
    /// `requires[i]` holds the indices entry `i` must come after
    requires: Vec<BTreeSet<usize>>,
}

impl Graph {
    /// Add `app` unless an entry with its id exists; returns its index and
    /// whether it was new
    fn insert(&mut self, app: Arc<App>) -> (usize, bool) {
        if let Some(&i) = self.index.get(&app.id) {
            return (i, false);
        }
        let i = self.apps.len();
        self.index.insert(app.id.clone(), i);
        self.apps.push(app);
        self.requires.push(BTreeSet::new());
        (i, true)
    }

    /// Kahn rounds: every round emits all entries whose dependencies are
    /// emitted, in first-seen order
    fn order(&self) -> Result<Vec<usize>> {
        let n = self.apps.len();
        let max_rounds = n * n;
        let mut emitted = vec![false; n];
        let mut order = Vec::with_capacity(n);
        let mut rounds = 0;

        while order.len() < n {
            rounds += 1;
            let ready: Vec<usize> = (0..n)
                .filter(|&i| !emitted[i] && self.requires[i].iter().all(|&dep| emitted[dep]))
                .collect();
            if ready.is_empty() || rounds > max_rounds {
                let ids = (0..n)
                    .filter(|&i| !emitted[i])
                    .map(|i| self.apps[i].id.clone())
                    .collect();
                return Err(ResolveError::DependencyCycle { ids });
            }
            for i in ready {
                emitted[i] = true;
                order.push(i);
            }
        }
        Ok(order)
    }
}

pub struct DependencyResolver<'a> {
    source: &'a dyn DependencySource,
    domain: &'a dyn DomainInstallations,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(source: &'a dyn DependencySource, domain: &'a dyn DomainInstallations) -> Self {
        DependencyResolver { source, domain }
    }

    /// Add the edge `from -> latest(dep_id)`, pulling the dependency in when
    /// it is not installed
    fn pull(&self, graph: &mut Graph, queue: &mut Vec<usize>, from: usize, dep_id: &str) -> Result<()> {
        let Some(dep) = self.source.latest(dep_id)? else {
            warn!(
                "{} requires {}, which is not in the catalog; ignoring",
                graph.apps[from], dep_id
            );
            return Ok(());
        };
        if self.source.is_installed(&dep) {
            return Ok(());
        }
        let (to, new) = graph.insert(dep);
        if new {
            debug!("{} pulls in {}", graph.apps[from], graph.apps[to]);
            queue.push(to);
        }
        graph.requires[from].insert(to);
        Ok(())
    }

    /// Order `apps` for `action`.
    ///
    /// Entries sharing an id are collapsed to the first one. Installs and
    /// upgrades may return more entries than requested, removals never do.
    #[instrument(level = "debug", skip(self, apps), fields(count = apps.len()))]
    pub fn resolve(&self, apps: &[Arc<App>], action: Action) -> Result<Vec<Arc<App>>> {
        let mut graph = Graph::default();
        for app in apps {
            graph.insert(Arc::clone(app));
        }

        match action {
            Action::Install | Action::Upgrade => {
                let mut queue: Vec<usize> = (0..graph.apps.len()).collect();
                while let Some(i) = queue.pop() {
                    let app = Arc::clone(&graph.apps[i]);
                    for dep_id in &app.required_apps {
                        self.pull(&mut graph, &mut queue, i, dep_id)?;
                    }
                    for dep_id in &app.required_apps_in_domain {
                        if self.domain.has_any_installed_instance(dep_id) {
                            continue;
                        }
                        self.pull(&mut graph, &mut queue, i, dep_id)?;
                    }
                }
            }
            Action::Remove => {
                for i in 0..graph.apps.len() {
                    let app = Arc::clone(&graph.apps[i]);
                    for dep_id in app.required_apps.iter().chain(&app.required_apps_in_domain) {
                        if let Some(&j) = graph.index.get(dep_id) {
                            graph.requires[i].insert(j);
                        }
                    }
                }
            }
        }

        let mut ordered: Vec<Arc<App>> = graph
            .order()?
            .into_iter()
            .map(|i| Arc::clone(&graph.apps[i]))
            .collect();
        if action == Action::Remove {
            ordered.reverse();
        }
        Ok(ordered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installed::{InstalledRegistry, StaticRegistry};
    use std::str::FromStr;

    /// Catalog of the newest entry per id
    struct Fixture {
        apps: Vec<Arc<App>>,
        registry: StaticRegistry,
    }

    impl DependencySource for Fixture {
        fn latest(&self, app_id: &str) -> std::result::Result<Option<Arc<App>>, CacheError> {
            Ok(self.apps.iter().find(|a| a.id == app_id).cloned())
        }

        fn is_installed(&self, app: &App) -> bool {
            self.registry.is_installed(&app.id, &app.version)
        }
    }

    fn app(id: &str, required: &[&str], in_domain: &[&str]) -> Arc<App> {
        let mut app = App::new(id, "1.0");
        app.required_apps = required.iter().map(|s| s.to_string()).collect();
        app.required_apps_in_domain = in_domain.iter().map(|s| s.to_string()).collect();
        Arc::new(app)
    }

    fn ids(apps: &[Arc<App>]) -> Vec<&str> {
        apps.iter().map(|a| a.id.as_str()).collect()
    }

    fn fixture(apps: Vec<Arc<App>>, registry: StaticRegistry) -> Fixture {
        Fixture { apps, registry }
    }

    #[test]
    fn test_install_pulls_in_missing_dependencies() {
        let catalog = fixture(
            vec![
                app("a", &["b"], &[]),
                app("b", &["c"], &[]),
                app("c", &[], &[]),
                app("d", &[], &[]),
            ],
            StaticRegistry::new(),
        );
        let resolver = DependencyResolver::new(&catalog, &catalog.registry);
        let ordered = resolver
            .resolve(&[Arc::clone(&catalog.apps[0]), Arc::clone(&catalog.apps[3])], Action::Install)
            .unwrap();
        assert_eq!(ids(&ordered), vec!["d", "c", "b", "a"]);
    }

    #[test]
    fn test_installed_and_unknown_dependencies_are_dropped() {
        let catalog = fixture(
            vec![app("a", &["b", "ghost"], &[]), app("b", &[], &[])],
            StaticRegistry::new().with_installed("b", "1.0"),
        );
        let resolver = DependencyResolver::new(&catalog, &catalog.registry);
        let ordered = resolver
            .resolve(&[Arc::clone(&catalog.apps[0])], Action::Install)
            .unwrap();
        assert_eq!(ids(&ordered), vec!["a"]);
    }

    #[test]
    fn test_domain_requirements() {
        let catalog = fixture(
            vec![app("a", &[], &["ldap"]), app("ldap", &[], &[])],
            StaticRegistry::new(),
        );
        let requested = [Arc::clone(&catalog.apps[0])];

        let resolver = DependencyResolver::new(&catalog, &catalog.registry);
        assert_eq!(
            ids(&resolver.resolve(&requested, Action::Install).unwrap()),
            vec!["ldap", "a"]
        );

        let elsewhere = StaticRegistry::new().with_domain_installation("ldap");
        let resolver = DependencyResolver::new(&catalog, &elsewhere);
        assert_eq!(ids(&resolver.resolve(&requested, Action::Install).unwrap()), vec!["a"]);
    }

    #[test]
    fn test_resolving_the_output_again_is_a_no_op() {
        let catalog = fixture(
            vec![
                app("b", &[], &[]),
                app("a", &["b"], &[]),
                app("x", &[], &[]),
                app("y", &["a", "x"], &[]),
            ],
            StaticRegistry::new(),
        );
        let resolver = DependencyResolver::new(&catalog, &catalog.registry);
        let first = resolver.resolve(&catalog.apps, Action::Install).unwrap();
        assert_eq!(ids(&first), vec!["b", "x", "a", "y"]);
        let second = resolver.resolve(&first, Action::Install).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_cycle_is_an_error() {
        let catalog = fixture(
            vec![app("a", &["b"], &[]), app("b", &["a"], &[])],
            StaticRegistry::new(),
        );
        let resolver = DependencyResolver::new(&catalog, &catalog.registry);
        match resolver.resolve(&[Arc::clone(&catalog.apps[0])], Action::Install) {
            Err(ResolveError::DependencyCycle { ids }) => assert_eq!(ids, vec!["a", "b"]),
            other => panic!("expected a cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_remove_orders_dependents_first() {
        let catalog = fixture(
            vec![app("a", &["b"], &[]), app("b", &[], &[])],
            StaticRegistry::new(),
        );
        let resolver = DependencyResolver::new(&catalog, &catalog.registry);

        let both = resolver.resolve(&catalog.apps, Action::Remove).unwrap();
        assert_eq!(ids(&both), vec!["a", "b"]);
        let reversed = [Arc::clone(&catalog.apps[1]), Arc::clone(&catalog.apps[0])];
        assert_eq!(ids(&resolver.resolve(&reversed, Action::Remove).unwrap()), vec!["a", "b"]);

        // removing b alone never drags a along
        let only_b = resolver
            .resolve(&[Arc::clone(&catalog.apps[1])], Action::Remove)
            .unwrap();
        assert_eq!(ids(&only_b), vec!["b"]);
    }

    #[test]
    fn test_duplicates_collapse() {
        let catalog = fixture(vec![app("a", &[], &[])], StaticRegistry::new());
        let resolver = DependencyResolver::new(&catalog, &catalog.registry);
        let ordered = resolver
            .resolve(&[Arc::clone(&catalog.apps[0]), Arc::clone(&catalog.apps[0])], Action::Upgrade)
            .unwrap();
        assert_eq!(ids(&ordered), vec!["a"]);
    }

    #[test]
    fn test_action_names() {
        assert_eq!(Action::from_str("remove").unwrap(), Action::Remove);
        assert_eq!(Action::Install.to_string(), "install");
        assert!(Action::from_str("purge").is_err());
    }
}
