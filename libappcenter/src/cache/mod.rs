//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Multi-level catalog cache.
//!
//! A [`LocalCatalogCache`] covers one server, platform version and locale.
//! It serves apps from memory, from a JSON snapshot on disk or, when neither
//! is usable, by parsing the raw descriptors again. A [`FederatedCatalog`]
//! unions the local caches of every platform version compatible with the
//! running one. [`CacheRegistry`] hands out shared instances so that every
//! caller in a process sees the same in-memory state.

use crate::config::ConfigError;
use miette::Diagnostic;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors a cache surfaces to its callers.
///
/// Storage problems are handled inside the cache by rebuilding; only
/// problems with exclusive access and configuration get this far.
#[derive(Debug, Error, Diagnostic)]
pub enum CacheError {
    #[error("cache {scope} is already held by this thread")]
    #[diagnostic(
        code(appcenter::cache_error::reentrant),
        help("A cache operation must not call back into the same cache")
    )]
    Reentrant { scope: String },

    #[error("timed out after {waited:?} waiting for cache {scope}")]
    #[diagnostic(
        code(appcenter::cache_error::lock_timeout),
        help("Another thread holds the cache; raise lock-timeout or retry later")
    )]
    LockTimeout { scope: String, waited: Duration },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

/// Reasons a snapshot cannot be used
#[derive(Debug, Error, Diagnostic)]
pub enum SnapshotError {
    #[error("no snapshot at {0}")]
    #[diagnostic(
        code(appcenter::snapshot_error::missing),
        help("The snapshot is written on the next rebuild")
    )]
    Missing(PathBuf),

    #[error("snapshot {0} is older than the catalog bundle")]
    #[diagnostic(
        code(appcenter::snapshot_error::older_than_bundle),
        help("The catalog was updated since the snapshot was written")
    )]
    OlderThanBundle(PathBuf),

    #[error("snapshot {snapshot} is older than schema source {source_file}")]
    #[diagnostic(
        code(appcenter::snapshot_error::older_than_schema_source),
        help("The schema changed since the snapshot was written")
    )]
    OlderThanSchemaSource {
        snapshot: PathBuf,
        source_file: PathBuf,
    },

    #[error("schema source {0} has no readable modification time")]
    #[diagnostic(
        code(appcenter::snapshot_error::schema_source_unreadable),
        help("Check the schema-sources setting")
    )]
    SchemaSourceUnreadable(PathBuf),

    #[error("snapshot {0} was written for a different schema")]
    #[diagnostic(
        code(appcenter::snapshot_error::schema_mismatch),
        help("The snapshot is rebuilt automatically")
    )]
    SchemaMismatch(PathBuf),

    #[error("failed to parse snapshot {path}: {source}")]
    #[diagnostic(
        code(appcenter::snapshot_error::parse),
        help("The snapshot is rebuilt automatically")
    )]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error on snapshot {path}: {source}")]
    #[diagnostic(
        code(appcenter::snapshot_error::io),
        help("Check that the cache directory is readable and writable")
    )]
    IO {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub mod federated;
pub mod fingerprint;
mod lock;
pub mod local;
pub mod registry;
pub mod tables;
#[cfg(test)]
mod tests;

pub use federated::{FederatedCatalog, UpgradeStatus};
pub use fingerprint::{CacheFingerprint, LiveSchema, SchemaFingerprint};
pub use lock::{CacheGuard, CacheLock};
pub use local::LocalCatalogCache;
pub use registry::CacheRegistry;
pub use tables::SideTables;
