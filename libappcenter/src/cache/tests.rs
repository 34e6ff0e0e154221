//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use super::*;
use crate::app::App;
use crate::config::AppCenterConfig;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::{tempdir, TempDir};

/// A schema whose identifiers can be changed between loads
#[derive(Debug)]
struct DriftingSchema {
    version: String,
    extra_attribute: Option<String>,
}

impl SchemaFingerprint for DriftingSchema {
    fn schema_versions(&self) -> Vec<String> {
        vec![self.version.clone()]
    }

    fn attribute_names(&self) -> Vec<String> {
        let mut names = LiveSchema::default().attribute_names();
        names.extend(self.extra_attribute.clone());
        names
    }

    fn schema_sources(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

fn descriptor(id: &str, version: &str) -> String {
    format!(
        "[Application]\nID={id}\nCode={code}\nName={id}\nVersion={version}\n",
        id = id,
        code = &id.to_uppercase()[..2],
        version = version
    )
}

fn write_app(cache_dir: &Path, component: &str, id: &str, version: &str) {
    fs::create_dir_all(cache_dir).unwrap();
    fs::write(cache_dir.join(format!("{}.ini", component)), descriptor(id, version)).unwrap();
}

fn set_mtime(path: &Path, time: SystemTime) {
    File::options()
        .append(true)
        .create(true)
        .open(path)
        .unwrap()
        .set_modified(time)
        .unwrap();
}

fn local_cache(dir: &TempDir, schema: Arc<dyn SchemaFingerprint>) -> LocalCatalogCache {
    let tables = Arc::new(SideTables::new(dir.path()));
    LocalCatalogCache::new(tables, "4.4", "en", schema, Duration::from_secs(1))
}

fn ids(apps: &[Arc<App>]) -> Vec<String> {
    apps.iter().map(|a| a.to_string()).collect()
}

#[test]
fn test_rebuild_then_round_trip() {
    let dir = tempdir().unwrap();
    let cache_dir = dir.path().join("4.4");
    write_app(&cache_dir, "wiki_2", "wiki", "2.0");
    write_app(&cache_dir, "wiki_1", "wiki", "1.0");
    write_app(&cache_dir, "mail", "mail", "3.1");
    fs::write(cache_dir.join("broken.ini"), "[Application]\nID=broken\n").unwrap();
    fs::write(cache_dir.join("README"), "not a descriptor").unwrap();

    let schema: Arc<dyn SchemaFingerprint> = Arc::new(LiveSchema::default());
    let cache = local_cache(&dir, Arc::clone(&schema));
    assert!(matches!(cache.load_snapshot(), Err(SnapshotError::Missing(_))));

    let apps = cache.get_every_single_app().unwrap();
    assert_eq!(ids(&apps), vec!["mail=3.1", "wiki=1.0", "wiki=2.0"]);
    assert!(cache.cache_file().exists());

    // a second instance sees the same apps through the snapshot
    let fresh = local_cache(&dir, schema);
    let (loaded, _) = fresh.load_snapshot().unwrap();
    assert_eq!(loaded, apps);
    assert_eq!(fresh.get_every_single_app().unwrap(), apps);
}

#[test]
fn test_snapshot_is_used_while_fresh() {
    let dir = tempdir().unwrap();
    let cache_dir = dir.path().join("4.4");
    write_app(&cache_dir, "wiki", "wiki", "1.0");

    let schema: Arc<dyn SchemaFingerprint> = Arc::new(LiveSchema::default());
    let cache = local_cache(&dir, Arc::clone(&schema));
    cache.get_every_single_app().unwrap();

    // descriptor changes without a bundle update are not noticed
    write_app(&cache_dir, "wiki", "wiki", "1.1");
    let again = local_cache(&dir, Arc::clone(&schema));
    assert_eq!(ids(&again.get_every_single_app().unwrap()), vec!["wiki=1.0"]);

    // a newer bundle invalidates memory and snapshot
    let future = SystemTime::now() + Duration::from_secs(3600);
    set_mtime(&cache.bundle_file(), future);
    assert!(matches!(
        again.load_snapshot(),
        Err(SnapshotError::OlderThanBundle(_))
    ));
    assert_eq!(ids(&again.get_every_single_app().unwrap()), vec!["wiki=1.1"]);
    assert_eq!(ids(&cache.get_every_single_app().unwrap()), vec!["wiki=1.1"]);
}

#[test]
fn test_schema_drift_invalidates_snapshot() {
    let dir = tempdir().unwrap();
    write_app(&dir.path().join("4.4"), "wiki", "wiki", "1.0");

    let old: Arc<dyn SchemaFingerprint> = Arc::new(DriftingSchema {
        version: "app-schema/1".to_string(),
        extra_attribute: None,
    });
    let cache = local_cache(&dir, old);
    cache.get_every_single_app().unwrap();
    assert!(cache.load_snapshot().is_ok());

    let bumped: Arc<dyn SchemaFingerprint> = Arc::new(DriftingSchema {
        version: "app-schema/2".to_string(),
        extra_attribute: None,
    });
    assert!(matches!(
        local_cache(&dir, bumped).load_snapshot(),
        Err(SnapshotError::SchemaMismatch(_))
    ));

    let widened: Arc<dyn SchemaFingerprint> = Arc::new(DriftingSchema {
        version: "app-schema/1".to_string(),
        extra_attribute: Some("logo".to_string()),
    });
    let rebuilt = local_cache(&dir, widened);
    assert!(matches!(
        rebuilt.load_snapshot(),
        Err(SnapshotError::SchemaMismatch(_))
    ));
    // rebuilding rewrites the snapshot with the new schema
    assert_eq!(ids(&rebuilt.get_every_single_app().unwrap()), vec!["wiki=1.0"]);
    assert!(rebuilt.load_snapshot().is_ok());
}

#[test]
fn test_schema_source_newer_than_snapshot() {
    let dir = tempdir().unwrap();
    write_app(&dir.path().join("4.4"), "wiki", "wiki", "1.0");
    let source = dir.path().join("app-schema.ini");
    set_mtime(&source, SystemTime::UNIX_EPOCH + Duration::from_secs(60));

    let schema: Arc<dyn SchemaFingerprint> = Arc::new(LiveSchema::new(vec![source.clone()]));
    let cache = local_cache(&dir, Arc::clone(&schema));
    cache.get_every_single_app().unwrap();
    assert!(cache.load_snapshot().is_ok());

    set_mtime(&source, SystemTime::now() + Duration::from_secs(3600));
    assert!(matches!(
        cache.load_snapshot(),
        Err(SnapshotError::OlderThanSchemaSource { .. })
    ));

    fs::remove_file(&source).unwrap();
    assert!(matches!(
        cache.load_snapshot(),
        Err(SnapshotError::SchemaSourceUnreadable(_))
    ));
}

#[test]
fn test_corrupt_snapshot_falls_back_to_descriptors() {
    let dir = tempdir().unwrap();
    write_app(&dir.path().join("4.4"), "wiki", "wiki", "1.0");
    let cache = local_cache(&dir, Arc::new(LiveSchema::default()));
    fs::write(cache.cache_file(), "{ not json").unwrap();

    assert!(matches!(cache.load_snapshot(), Err(SnapshotError::Parse { .. })));
    assert_eq!(ids(&cache.get_every_single_app().unwrap()), vec!["wiki=1.0"]);
    assert!(cache.load_snapshot().is_ok());
}

#[test]
fn test_clear_cache_keeps_descriptors() {
    let dir = tempdir().unwrap();
    let cache_dir = dir.path().join("4.4");
    write_app(&cache_dir, "wiki", "wiki", "1.0");
    fs::write(cache_dir.join(".apps.de.json"), "{}").unwrap();

    let cache = local_cache(&dir, Arc::new(LiveSchema::default()));
    cache.get_every_single_app().unwrap();
    cache.clear_cache().unwrap();

    assert!(!cache.cache_file().exists());
    assert!(!cache_dir.join(".apps.de.json").exists());
    assert!(cache_dir.join("wiki.ini").exists());
    assert_eq!(ids(&cache.get_every_single_app().unwrap()), vec!["wiki=1.0"]);
}

#[test]
fn test_missing_directory_is_empty() {
    let dir = tempdir().unwrap();
    let cache = local_cache(&dir, Arc::new(LiveSchema::default()));
    assert!(cache.get_every_single_app().unwrap().is_empty());
    assert!(!cache.cache_file().exists());
}

#[test]
fn test_concurrent_readers_share_one_load() {
    let dir = tempdir().unwrap();
    write_app(&dir.path().join("4.4"), "wiki", "wiki", "1.0");
    let cache = Arc::new(local_cache(&dir, Arc::new(LiveSchema::default())));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || cache.get_every_single_app().map(|apps| ids(&apps)))
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap(), vec!["wiki=1.0"]);
    }
}

fn federated_fixture(dir: &TempDir) -> AppCenterConfig {
    let config = AppCenterConfig::with_cache_root(dir.path());
    let server_dir = config.server_dir().unwrap();
    write_app(&server_dir.join("4.4"), "wiki_44", "wiki", "1.0");
    write_app(&server_dir.join("5.0"), "wiki_50", "wiki", "2.0");
    write_app(&server_dir.join("5.0"), "mail_50", "mail", "1.0");
    fs::write(
        server_dir.join("ucs.ini"),
        "[4.4]\nSupportedUCSVersions = 4.4\n\n[5.0]\nSupportedUCSVersions = 5.0, 4.4\n",
    )
    .unwrap();
    config
}

#[test]
fn test_federated_union() {
    let dir = tempdir().unwrap();
    let config = AppCenterConfig {
        ucs_version: "5.0".to_string(),
        ..federated_fixture(&dir)
    };
    let registry = CacheRegistry::from_config(&config);
    let catalog = registry.federated(&config).unwrap();

    assert_eq!(catalog.resolve_compatible_versions(), vec!["5.0", "4.4"]);
    let apps = catalog.get_every_single_app().unwrap();
    assert_eq!(ids(&apps), vec!["mail=1.0", "wiki=1.0", "wiki=2.0"]);
    assert_eq!(apps[1].ucs_version, "4.4");
}

#[test]
fn test_federated_follows_running_upgrade() {
    let dir = tempdir().unwrap();
    let status = dir.path().join("updater.status");
    fs::write(&status, "status=RUNNING\nnext_version=5.0-0\n").unwrap();
    let config = AppCenterConfig {
        ucs_version: "4.4".to_string(),
        upgrade_status_file: Some(status.clone()),
        ..federated_fixture(&dir)
    };
    let registry = CacheRegistry::from_config(&config);
    let catalog = registry.federated(&config).unwrap();
    assert_eq!(catalog.resolve_current_version(), "5.0");

    fs::write(&status, "status=DONE\nnext_version=5.0-0\n").unwrap();
    assert_eq!(catalog.resolve_current_version(), "4.4");
    assert_eq!(ids(&catalog.get_every_single_app().unwrap()), vec!["wiki=1.0"]);
}

#[test]
fn test_federated_clear_cache() {
    let dir = tempdir().unwrap();
    let config = AppCenterConfig {
        ucs_version: "5.0".to_string(),
        ..federated_fixture(&dir)
    };
    let registry = CacheRegistry::from_config(&config);
    let catalog = registry.federated(&config).unwrap();
    catalog.get_every_single_app().unwrap();

    let server_dir = config.server_dir().unwrap();
    assert!(server_dir.join("5.0/.apps.en.json").exists());
    fs::write(server_dir.join("ucs.ini"), "[5.0]\nSupportedUCSVersions = 5.0\n").unwrap();
    // version groups are memoized until cleared
    assert_eq!(catalog.resolve_compatible_versions(), vec!["5.0", "4.4"]);

    catalog.clear_cache().unwrap();
    assert!(!server_dir.join("5.0/.apps.en.json").exists());
    assert!(!server_dir.join("4.4/.apps.en.json").exists());
    assert_eq!(catalog.resolve_compatible_versions(), vec!["5.0"]);
    assert_eq!(
        ids(&catalog.get_every_single_app().unwrap()),
        vec!["mail=1.0", "wiki=2.0"]
    );
}
