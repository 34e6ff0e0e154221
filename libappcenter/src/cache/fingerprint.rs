//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use super::SnapshotError;
use crate::app::App;
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Modification time of `path`, `None` when it cannot be read
pub fn mtime<P: AsRef<Path>>(path: P) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// What the running code considers the current schema
pub trait SchemaFingerprint: Debug + Send + Sync {
    /// Identifiers bumped on every incompatible parsing change
    fn schema_versions(&self) -> Vec<String>;

    fn attribute_names(&self) -> Vec<String>;

    /// Files that define the schema; a snapshot older than any of them is
    /// stale
    fn schema_sources(&self) -> Vec<PathBuf>;
}

/// The schema compiled into this library
#[derive(Debug, Clone, Default)]
pub struct LiveSchema {
    sources: Vec<PathBuf>,
}

impl LiveSchema {
    pub fn new(sources: Vec<PathBuf>) -> Self {
        LiveSchema { sources }
    }
}

impl SchemaFingerprint for LiveSchema {
    fn schema_versions(&self) -> Vec<String> {
        App::SCHEMA_VERSIONS.iter().map(|s| s.to_string()).collect()
    }

    fn attribute_names(&self) -> Vec<String> {
        App::ATTRIBUTE_NAMES.iter().map(|s| s.to_string()).collect()
    }

    fn schema_sources(&self) -> Vec<PathBuf> {
        self.sources.clone()
    }
}

/// Everything that decides whether a snapshot may be used
#[derive(Debug, Clone, PartialEq)]
pub struct CacheFingerprint {
    pub snapshot: PathBuf,
    pub snapshot_mtime: Option<SystemTime>,
    /// `None` when there is no bundle; freshness is then unknown
    pub bundle_mtime: Option<SystemTime>,
    pub source_mtimes: Vec<(PathBuf, Option<SystemTime>)>,
}

impl CacheFingerprint {
    /// Collect the modification times relevant for `snapshot`
    pub fn collect(snapshot: &Path, bundle: &Path, schema: &dyn SchemaFingerprint) -> Self {
        CacheFingerprint {
            snapshot: snapshot.to_path_buf(),
            snapshot_mtime: mtime(snapshot),
            bundle_mtime: mtime(bundle),
            source_mtimes: schema
                .schema_sources()
                .into_iter()
                .map(|path| {
                    let modified = mtime(&path);
                    (path, modified)
                })
                .collect(),
        }
    }

    /// Check the time stamps; returns the snapshot mtime when it is fresh
    pub fn check_times(&self) -> Result<SystemTime, SnapshotError> {
        let Some(snapshot_mtime) = self.snapshot_mtime else {
            return Err(SnapshotError::Missing(self.snapshot.clone()));
        };
        if let Some(bundle_mtime) = self.bundle_mtime {
            if snapshot_mtime < bundle_mtime {
                return Err(SnapshotError::OlderThanBundle(self.snapshot.clone()));
            }
        }
        for (source, modified) in &self.source_mtimes {
            match modified {
                None => return Err(SnapshotError::SchemaSourceUnreadable(source.clone())),
                Some(modified) if snapshot_mtime < *modified => {
                    return Err(SnapshotError::OlderThanSchemaSource {
                        snapshot: self.snapshot.clone(),
                        source_file: source.clone(),
                    })
                }
                Some(_) => {}
            }
        }
        Ok(snapshot_mtime)
    }

    /// Compare the schema recorded in a snapshot with the live one
    pub fn check_schema(
        &self,
        schema_versions: &[String],
        attribute_names: &[String],
        live: &dyn SchemaFingerprint,
    ) -> Result<(), SnapshotError> {
        let mut recorded_attributes = attribute_names.to_vec();
        let mut live_attributes = live.attribute_names();
        recorded_attributes.sort();
        live_attributes.sort();
        if schema_versions != live.schema_versions().as_slice()
            || recorded_attributes != live_attributes
        {
            return Err(SnapshotError::SchemaMismatch(self.snapshot.clone()));
        }
        Ok(())
    }
}
