//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use super::fingerprint::{mtime, CacheFingerprint, SchemaFingerprint};
use super::lock::CacheLock;
use super::registry::CacheRegistry;
use super::tables::SideTables;
use super::{Result, SnapshotError};
use crate::app::App;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Marker whose modification time tells when the catalog was last fetched
pub const BUNDLE_FILE: &str = ".all.tar";

/// Envelope of a snapshot file
#[derive(Debug, Deserialize)]
struct Snapshot {
    schema: Vec<String>,
    attributes: Vec<String>,
    apps: Vec<App>,
}

#[derive(Debug, Serialize)]
struct SnapshotRef<'a> {
    schema: Vec<String>,
    attributes: Vec<String>,
    apps: Vec<&'a App>,
}

#[derive(Debug, Default)]
struct CacheState {
    apps: Vec<Arc<App>>,
    /// `None` until something was loaded
    loaded_at: Option<SystemTime>,
}

/// Catalog of one server, platform version and locale
#[derive(Debug)]
pub struct LocalCatalogCache {
    ucs_version: String,
    locale: String,
    cache_dir: PathBuf,
    tables: Arc<SideTables>,
    schema: Arc<dyn SchemaFingerprint>,
    lock: CacheLock,
    state: Mutex<CacheState>,
}

impl LocalCatalogCache {
    pub fn new(
        tables: Arc<SideTables>,
        ucs_version: &str,
        locale: &str,
        schema: Arc<dyn SchemaFingerprint>,
        lock_timeout: Duration,
    ) -> Self {
        let cache_dir = tables.server_dir().join(ucs_version);
        LocalCatalogCache {
            ucs_version: ucs_version.to_string(),
            locale: locale.to_string(),
            lock: CacheLock::new(
                format!("{}:{}", cache_dir.display(), locale),
                lock_timeout,
            ),
            cache_dir,
            tables,
            schema,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn ucs_version(&self) -> &str {
        &self.ucs_version
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn cache_file(&self) -> PathBuf {
        self.cache_dir.join(format!(".apps.{}.json", self.locale))
    }

    pub fn bundle_file(&self) -> PathBuf {
        self.cache_dir.join(BUNDLE_FILE)
    }

    pub fn side_tables(&self) -> &Arc<SideTables> {
        &self.tables
    }

    /// The cache of the same server and version for another locale
    pub fn copy(&self, registry: &CacheRegistry, locale: &str) -> Arc<LocalCatalogCache> {
        registry.local_cache(&self.tables, &self.ucs_version, locale)
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every app of this cache, sorted.
    ///
    /// Serves from memory while the bundle is not newer than what was
    /// loaded, then from the snapshot, then from the descriptors.
    pub fn get_every_single_app(&self) -> Result<Vec<Arc<App>>> {
        let _guard = self.lock.acquire()?;
        let mut state = self.state();

        if let (Some(loaded_at), Some(bundle)) = (state.loaded_at, mtime(self.bundle_file())) {
            if bundle > loaded_at {
                info!("Catalog bundle in {} changed, reloading", self.cache_dir.display());
                *state = CacheState::default();
            }
        }

        if state.loaded_at.is_none() {
            match self.load_snapshot() {
                Ok((apps, loaded_at)) => {
                    debug!("Loaded {} apps from {}", apps.len(), self.cache_file().display());
                    state.apps = apps;
                    state.loaded_at = Some(loaded_at);
                }
                Err(reason) => {
                    debug!("Not using snapshot: {}", reason);
                    let apps = self.read_descriptors();
                    let loaded_at = if apps.is_empty() && !self.cache_dir.is_dir() {
                        SystemTime::now()
                    } else {
                        match self.save_snapshot(&apps) {
                            Ok(written) => written,
                            Err(e) => {
                                warn!("Could not write snapshot: {}", e);
                                SystemTime::now()
                            }
                        }
                    };
                    state.apps = apps;
                    state.loaded_at = Some(loaded_at);
                }
            }
        }
        Ok(state.apps.clone())
    }

    /// Read the snapshot if it is fresh and matches the live schema.
    ///
    /// Returns the apps and the snapshot's modification time.
    pub fn load_snapshot(
        &self,
    ) -> std::result::Result<(Vec<Arc<App>>, SystemTime), SnapshotError> {
        let path = self.cache_file();
        let fingerprint =
            CacheFingerprint::collect(&path, &self.bundle_file(), self.schema.as_ref());
        let modified = fingerprint.check_times()?;

        let content = fs::read(&path).map_err(|source| SnapshotError::IO {
            path: path.clone(),
            source,
        })?;
        let snapshot: Snapshot =
            serde_json::from_slice(&content).map_err(|source| SnapshotError::Parse {
                path: path.clone(),
                source,
            })?;
        fingerprint.check_schema(&snapshot.schema, &snapshot.attributes, self.schema.as_ref())?;

        Ok((snapshot.apps.into_iter().map(Arc::new).collect(), modified))
    }

    /// Write `apps` as the snapshot; returns the written file's mtime
    pub fn save_snapshot(&self, apps: &[Arc<App>]) -> std::result::Result<SystemTime, SnapshotError> {
        let path = self.cache_file();
        let io_error = |source: std::io::Error| SnapshotError::IO {
            path: path.clone(),
            source,
        };
        let snapshot = SnapshotRef {
            schema: self.schema.schema_versions(),
            attributes: self.schema.attribute_names(),
            apps: apps.iter().map(Arc::as_ref).collect(),
        };
        let content = serde_json::to_vec(&snapshot).map_err(|source| SnapshotError::Parse {
            path: path.clone(),
            source,
        })?;

        let partial = path.with_extension("json.part");
        fs::write(&partial, content).map_err(io_error)?;
        fs::rename(&partial, &path).map_err(io_error)?;
        let written = fs::metadata(&path)
            .and_then(|m| m.modified())
            .map_err(io_error)?;
        debug!("Wrote {} apps to {}", apps.len(), path.display());
        Ok(written)
    }

    /// Parse every descriptor of the cache directory; broken ones are skipped
    fn read_descriptors(&self) -> Vec<Arc<App>> {
        if !self.cache_dir.is_dir() {
            debug!("No cache directory {}", self.cache_dir.display());
            return Vec::new();
        }
        let context = self.tables.descriptor_context(&self.locale);
        let mut apps: Vec<App> = WalkDir::new(&self.cache_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Cannot list {}: {}", self.cache_dir.display(), e);
                    None
                }
            })
            .filter(|entry| {
                entry.file_type().is_file()
                    && entry.path().extension().map(|e| e == "ini").unwrap_or(false)
            })
            .filter_map(|entry| {
                match App::from_ini(entry.path(), Some(&self.locale), &self.ucs_version, &context)
                {
                    Ok(app) => Some(app),
                    Err(e) => {
                        warn!("Skipping descriptor: {}", e);
                        None
                    }
                }
            })
            .collect();
        apps.sort_by(App::catalog_cmp);
        info!(
            "Read {} descriptors from {}",
            apps.len(),
            self.cache_dir.display()
        );
        apps.into_iter().map(Arc::new).collect()
    }

    /// Forget the in-memory apps and delete every snapshot of this directory.
    ///
    /// Descriptors are left alone.
    pub fn clear_cache(&self) -> Result<()> {
        let _guard = self.lock.acquire()?;
        *self.state() = CacheState::default();
        if !self.cache_dir.is_dir() {
            return Ok(());
        }
        for entry in WalkDir::new(&self.cache_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let name = entry.file_name().to_string_lossy();
            if entry.file_type().is_file() && name.starts_with(".apps.") && name.ends_with(".json")
            {
                debug!("Removing snapshot {}", entry.path().display());
                if let Err(e) = fs::remove_file(entry.path()) {
                    warn!("Could not remove {}: {}", entry.path().display(), e);
                }
            }
        }
        Ok(())
    }
}
