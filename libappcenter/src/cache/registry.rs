//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use super::federated::FederatedCatalog;
use super::fingerprint::{LiveSchema, SchemaFingerprint};
use super::local::LocalCatalogCache;
use super::tables::SideTables;
use super::Result;
use crate::config::AppCenterConfig;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

type LocalKey = (PathBuf, String, String);

/// Side tables and local caches, shared with every federated catalog
#[derive(Debug)]
pub(crate) struct LocalCaches {
    schema: Arc<dyn SchemaFingerprint>,
    lock_timeout: Duration,
    tables: Mutex<HashMap<PathBuf, Arc<SideTables>>>,
    locals: Mutex<HashMap<LocalKey, Arc<LocalCatalogCache>>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LocalCaches {
    pub(crate) fn side_tables(&self, server_dir: &Path) -> Arc<SideTables> {
        let mut tables = locked(&self.tables);
        Arc::clone(
            tables
                .entry(server_dir.to_path_buf())
                .or_insert_with(|| Arc::new(SideTables::new(server_dir))),
        )
    }

    pub(crate) fn local_cache(
        &self,
        tables: &Arc<SideTables>,
        ucs_version: &str,
        locale: &str,
    ) -> Arc<LocalCatalogCache> {
        let key = (
            tables.server_dir().to_path_buf(),
            ucs_version.to_string(),
            locale.to_string(),
        );
        let mut locals = locked(&self.locals);
        let cache = locals.entry(key).or_insert_with(|| {
            debug!(
                "New catalog cache for {} {} {}",
                tables.server_dir().display(),
                ucs_version,
                locale
            );
            Arc::new(LocalCatalogCache::new(
                Arc::clone(tables),
                ucs_version,
                locale,
                Arc::clone(&self.schema),
                self.lock_timeout,
            ))
        });
        Arc::clone(cache)
    }
}

/// Hands out one shared cache per scope.
///
/// Asking twice for the same server, version and locale returns the same
/// instance, so memory state and the guard are shared by all callers that
/// use the same registry.
#[derive(Debug)]
pub struct CacheRegistry {
    caches: Arc<LocalCaches>,
    federated: Mutex<HashMap<AppCenterConfig, Arc<FederatedCatalog>>>,
}

impl CacheRegistry {
    pub fn new(schema: Arc<dyn SchemaFingerprint>, lock_timeout: Duration) -> Self {
        CacheRegistry {
            caches: Arc::new(LocalCaches {
                schema,
                lock_timeout,
                tables: Mutex::new(HashMap::new()),
                locals: Mutex::new(HashMap::new()),
            }),
            federated: Mutex::new(HashMap::new()),
        }
    }

    /// A registry using the compiled-in schema and the configured timeout
    pub fn from_config(config: &AppCenterConfig) -> Self {
        Self::new(
            Arc::new(LiveSchema::new(config.schema_sources.clone())),
            config.lock_timeout(),
        )
    }

    /// Side tables of one server directory
    pub fn side_tables(&self, server_dir: &Path) -> Arc<SideTables> {
        self.caches.side_tables(server_dir)
    }

    /// Cache of one platform version of the server behind `tables`
    pub fn local_cache(
        &self,
        tables: &Arc<SideTables>,
        ucs_version: &str,
        locale: &str,
    ) -> Arc<LocalCatalogCache> {
        self.caches.local_cache(tables, ucs_version, locale)
    }

    /// The federated catalog for `config`.
    ///
    /// Equal configurations share one catalog. Catalogs of differing
    /// configurations still share the local caches of the same server,
    /// platform version and locale.
    pub fn federated(&self, config: &AppCenterConfig) -> Result<Arc<FederatedCatalog>> {
        let server_dir = config.server_dir()?;
        let mut federated = locked(&self.federated);
        let catalog = federated.entry(config.clone()).or_insert_with(|| {
            Arc::new(FederatedCatalog::new(
                config.clone(),
                server_dir,
                Arc::clone(&self.caches),
            ))
        });
        Ok(Arc::clone(catalog))
    }
}
