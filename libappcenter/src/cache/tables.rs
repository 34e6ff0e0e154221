//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Server-wide side tables.
//!
//! Next to the per-version descriptor directories, a server directory holds
//! a few INI tables that apply to every version:
//!
//! - `ucs.ini`: which platform versions can use the apps of which others
//! - `license_types.ini`: human readable license descriptions
//! - `rating.ini`: the ratings an app may carry
//! - `app_categories.ini`: translations of category names
//!
//! Each table is read once and kept until [`SideTables::clear`].

use crate::app::{DescriptorContext, RatingDefinition};
use ini::Ini;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

pub const VERSION_GROUPS_FILE: &str = "ucs.ini";
pub const LICENSE_TYPES_FILE: &str = "license_types.ini";
pub const RATINGS_FILE: &str = "rating.ini";
pub const APP_CATEGORIES_FILE: &str = "app_categories.ini";

#[derive(Debug, Default)]
struct Loaded {
    version_groups: Option<Arc<HashMap<String, Vec<String>>>>,
    license_types: Option<Arc<Ini>>,
    ratings: Option<Arc<Vec<RatingDefinition>>>,
    app_categories: Option<Arc<Ini>>,
}

/// Memoized side tables of one server directory
#[derive(Debug)]
pub struct SideTables {
    server_dir: PathBuf,
    loaded: Mutex<Loaded>,
}

/// Read an INI file; a missing or broken file is an empty table
fn load_table(path: &Path) -> Ini {
    if !path.exists() {
        debug!("No side table at {}", path.display());
        return Ini::new();
    }
    match Ini::load_from_file(path) {
        Ok(ini) => ini,
        Err(e) => {
            warn!("Ignoring unreadable side table {}: {}", path.display(), e);
            Ini::new()
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

impl SideTables {
    pub fn new<P: Into<PathBuf>>(server_dir: P) -> Self {
        SideTables {
            server_dir: server_dir.into(),
            loaded: Mutex::new(Loaded::default()),
        }
    }

    pub fn server_dir(&self) -> &Path {
        &self.server_dir
    }

    fn loaded(&self) -> MutexGuard<'_, Loaded> {
        self.loaded.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drop every memoized table
    pub fn clear(&self) {
        *self.loaded() = Loaded::default();
    }

    /// Platform version -> versions whose apps it may use
    pub fn version_groups(&self) -> Arc<HashMap<String, Vec<String>>> {
        let mut loaded = self.loaded();
        if let Some(groups) = &loaded.version_groups {
            return Arc::clone(groups);
        }
        let ini = load_table(&self.server_dir.join(VERSION_GROUPS_FILE));
        let groups: HashMap<String, Vec<String>> = ini
            .iter()
            .filter_map(|(section, props)| {
                let version = section?;
                let supported = props
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case("SupportedUCSVersions"))
                    .map(|(_, v)| split_list(v))?;
                Some((version.to_string(), supported))
            })
            .collect();
        let groups = Arc::new(groups);
        loaded.version_groups = Some(Arc::clone(&groups));
        groups
    }

    /// The versions whose apps `current` may use, `[current]` when unknown
    pub fn compatible_versions(&self, current: &str) -> Vec<String> {
        match self.version_groups().get(current) {
            Some(versions) if !versions.is_empty() => {
                let mut unique: Vec<String> = Vec::with_capacity(versions.len());
                for v in versions {
                    if !unique.contains(v) {
                        unique.push(v.clone());
                    }
                }
                unique
            }
            _ => vec![current.to_string()],
        }
    }

    fn license_types(&self) -> Arc<Ini> {
        let mut loaded = self.loaded();
        let table = loaded
            .license_types
            .get_or_insert_with(|| Arc::new(load_table(&self.server_dir.join(LICENSE_TYPES_FILE))));
        Arc::clone(table)
    }

    /// Description of a license type in `locale`, falling back to English
    pub fn license_description(&self, license: &str, locale: &str) -> Option<String> {
        let table = self.license_types();
        let section = table.section(Some(license))?;
        let localised = format!("Description_{}", locale);
        section
            .get(&localised)
            .or_else(|| section.get("Description"))
            .map(str::to_string)
    }

    /// Every rating defined by the server, in file order
    pub fn ratings(&self) -> Arc<Vec<RatingDefinition>> {
        let mut loaded = self.loaded();
        if let Some(ratings) = &loaded.ratings {
            return Arc::clone(ratings);
        }
        let ini = load_table(&self.server_dir.join(RATINGS_FILE));
        let ratings: Vec<RatingDefinition> = ini
            .iter()
            .filter_map(|(section, props)| {
                let name = section?;
                Some(RatingDefinition {
                    name: name.to_string(),
                    label: props.get("Label").unwrap_or(name).to_string(),
                    description: props.get("Description").unwrap_or_default().to_string(),
                })
            })
            .collect();
        let ratings = Arc::new(ratings);
        loaded.ratings = Some(Arc::clone(&ratings));
        ratings
    }

    /// Lowercase English category name -> label in `locale`
    pub fn app_categories(&self, locale: &str) -> HashMap<String, String> {
        let table = {
            let mut loaded = self.loaded();
            let table = loaded.app_categories.get_or_insert_with(|| {
                Arc::new(load_table(&self.server_dir.join(APP_CATEGORIES_FILE)))
            });
            Arc::clone(table)
        };
        table
            .section(Some(locale))
            .map(|props| {
                props
                    .iter()
                    .map(|(k, v)| (k.to_lowercase(), v.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The tables descriptor parsing needs for `locale`
    pub fn descriptor_context(&self, locale: &str) -> DescriptorContext {
        DescriptorContext {
            ratings: self.ratings().as_ref().clone(),
            app_categories: self.app_categories(locale),
        }
    }
}
