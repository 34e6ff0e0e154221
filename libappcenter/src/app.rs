//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! One version of one application in the catalog.
//!
//! An [`App`] is built either from a raw INI descriptor shipped by the App
//! Center server or from a cached snapshot. Descriptors look like this:
//!
//! ```ini
//! [Application]
//! ID = nextcloud
//! Code = NC
//! Name = Nextcloud
//! Version = 18.0.1
//! RequiredApps = collabora
//! SupportedUCSVersions = 4.4-4, 5.0-0
//!
//! [de]
//! Description = Dateien teilen
//! ```
//!
//! Keys are the attribute names without underscores and are matched
//! case-insensitively. Localisable attributes may be overridden in a section
//! named after the locale, and an optional `<component>.meta` file next to
//! the descriptor takes precedence over the descriptor itself.

use crate::installed::{InstallPermissions, InstalledRegistry};
use crate::version::{self, LooseVersion};
use ini::Ini;
use miette::Diagnostic;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

const APP_ID_PATTERN: &str = r"^[a-zA-Z0-9]+(([a-zA-Z0-9-_]+)?[a-zA-Z0-9])?$";
const APP_CODE_PATTERN: &str = r"^[A-Za-z0-9]{2}$";
const UCS_VERSION_PATTERN: &str = r"^(\d+)\.(\d+)-(\d+)(?: errata(\d+))?$";

const SERVER_ROLES: &[&str] = &[
    "domaincontroller_master",
    "domaincontroller_backup",
    "domaincontroller_slave",
    "memberserver",
];
const ARCHITECTURES: &[&str] = &["amd64", "i386"];
const PROXY_SCHEMES: &[&str] = &["http", "https", "both"];

/// Errors that can occur when building an app from a descriptor
#[derive(Debug, Error, Diagnostic)]
pub enum AppError {
    #[error("failed to read descriptor {path}: {message}")]
    #[diagnostic(
        code(appcenter::app_error::read),
        help("Check that the descriptor is a readable INI file")
    )]
    Read { path: PathBuf, message: String },

    #[error("descriptor {path} has no [Application] section")]
    #[diagnostic(
        code(appcenter::app_error::no_application_section),
        help("Every descriptor needs an [Application] section")
    )]
    NoApplicationSection { path: PathBuf },

    #[error("{path}: {attribute} is required")]
    #[diagnostic(
        code(appcenter::app_error::missing_attribute),
        help("Add the attribute to the [Application] section")
    )]
    MissingAttribute { path: PathBuf, attribute: String },

    #[error("{path}: {attribute} ({value:?}) is invalid: {reason}")]
    #[diagnostic(
        code(appcenter::app_error::invalid_attribute),
        help("Fix the attribute value in the descriptor")
    )]
    InvalidAttribute {
        path: PathBuf,
        attribute: String,
        value: String,
        reason: String,
    },
}

/// Result type for descriptor parsing
pub type Result<T> = std::result::Result<T, AppError>;

/// A rating shown next to an app, e.g. "recommended"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    pub name: String,
    pub label: String,
    pub description: String,
    pub value: i64,
}

/// A rating the server knows about, without a value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingDefinition {
    pub name: String,
    pub label: String,
    pub description: String,
}

/// Server-wide tables consulted while building apps from descriptors
#[derive(Debug, Clone, Default)]
pub struct DescriptorContext {
    pub ratings: Vec<RatingDefinition>,
    /// lowercase English category -> localised label
    pub app_categories: HashMap<String, String>,
}

/// One version of one application.
///
/// Field names are the schema's attribute names; they are what a snapshot
/// stores and what [`App::ATTRIBUTE_NAMES`] lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct App {
    pub id: String,
    pub code: String,
    pub component_id: String,
    pub ucs_version: String,
    pub name: String,
    pub version: String,
    pub install_permissions: bool,
    pub install_permissions_message: Option<String>,
    pub description: Option<String>,
    pub long_description: Option<String>,
    pub thumbnails: Vec<String>,
    pub categories: Vec<String>,
    pub app_categories: Vec<String>,
    pub website: Option<String>,
    pub support_url: Option<String>,
    pub contact: Option<String>,
    pub vendor: Option<String>,
    pub maintainer: Option<String>,
    pub license: String,
    pub notify_vendor: bool,
    pub web_interface: Option<String>,
    pub web_interface_name: Option<String>,
    pub web_interface_proxy_scheme: String,
    pub plugin_of: Option<String>,
    pub conflicted_apps: Vec<String>,
    pub required_apps: Vec<String>,
    pub required_apps_in_domain: Vec<String>,
    pub conflicted_system_packages: Vec<String>,
    pub required_ucs_version: Option<String>,
    pub supported_ucs_versions: Vec<String>,
    pub required_app_version_upgrade: Option<String>,
    pub end_of_life: bool,
    pub without_repository: bool,
    pub default_packages: Vec<String>,
    pub server_role: Vec<String>,
    pub supported_architectures: Vec<String>,
    pub min_physical_ram: i64,
    pub min_free_disk_space: i64,
    pub shop_url: Option<String>,
    pub docker_image: Option<String>,
    pub docker_main_service: Option<String>,
    pub docker_migration_works: bool,
    pub docker_migration_link: Option<String>,
    pub docker_allowed_images: Vec<String>,
    pub rating: Vec<Rating>,
    pub vote_for_app: bool,
}

impl Default for App {
    fn default() -> Self {
        App {
            id: String::new(),
            code: String::new(),
            component_id: String::new(),
            ucs_version: String::new(),
            name: String::new(),
            version: String::new(),
            install_permissions: false,
            install_permissions_message: None,
            description: None,
            long_description: None,
            thumbnails: Vec::new(),
            categories: Vec::new(),
            app_categories: Vec::new(),
            website: None,
            support_url: None,
            contact: None,
            vendor: None,
            maintainer: None,
            license: "default".to_string(),
            notify_vendor: true,
            web_interface: None,
            web_interface_name: None,
            web_interface_proxy_scheme: "both".to_string(),
            plugin_of: None,
            conflicted_apps: Vec::new(),
            required_apps: Vec::new(),
            required_apps_in_domain: Vec::new(),
            conflicted_system_packages: Vec::new(),
            required_ucs_version: None,
            supported_ucs_versions: Vec::new(),
            required_app_version_upgrade: None,
            end_of_life: false,
            without_repository: false,
            default_packages: Vec::new(),
            server_role: SERVER_ROLES.iter().map(|s| s.to_string()).collect(),
            supported_architectures: ARCHITECTURES.iter().map(|s| s.to_string()).collect(),
            min_physical_ram: 0,
            min_free_disk_space: 4000,
            shop_url: None,
            docker_image: None,
            docker_main_service: None,
            docker_migration_works: false,
            docker_migration_link: None,
            docker_allowed_images: Vec::new(),
            rating: Vec::new(),
            vote_for_app: false,
        }
    }
}

impl App {
    /// Every attribute of the schema, in declaration order.
    ///
    /// Snapshots record this list; a snapshot written with a different list
    /// is stale.
    pub const ATTRIBUTE_NAMES: &'static [&'static str] = &[
        "id",
        "code",
        "component_id",
        "ucs_version",
        "name",
        "version",
        "install_permissions",
        "install_permissions_message",
        "description",
        "long_description",
        "thumbnails",
        "categories",
        "app_categories",
        "website",
        "support_url",
        "contact",
        "vendor",
        "maintainer",
        "license",
        "notify_vendor",
        "web_interface",
        "web_interface_name",
        "web_interface_proxy_scheme",
        "plugin_of",
        "conflicted_apps",
        "required_apps",
        "required_apps_in_domain",
        "conflicted_system_packages",
        "required_ucs_version",
        "supported_ucs_versions",
        "required_app_version_upgrade",
        "end_of_life",
        "without_repository",
        "default_packages",
        "server_role",
        "supported_architectures",
        "min_physical_ram",
        "min_free_disk_space",
        "shop_url",
        "docker_image",
        "docker_main_service",
        "docker_migration_works",
        "docker_migration_link",
        "docker_allowed_images",
        "rating",
        "vote_for_app",
    ];

    /// Bumped whenever parsing or normalisation changes without the attribute
    /// list changing, so old snapshots get rebuilt.
    pub const SCHEMA_VERSIONS: &'static [&'static str] = &["app-schema/3"];

    /// Create a minimal app, mostly useful for tests and tooling
    pub fn new(id: &str, version: &str) -> Self {
        App {
            id: id.to_string(),
            code: id.chars().take(2).collect::<String>().to_uppercase(),
            component_id: format!("{}_{}", id, version),
            name: id.to_string(),
            version: version.to_string(),
            ..App::default()
        }
    }

    /// Build an app from a descriptor file.
    ///
    /// `locale` selects localised overrides, `ucs_version` is the platform
    /// version of the catalog the descriptor belongs to.
    pub fn from_ini<P: AsRef<Path>>(
        path: P,
        locale: Option<&str>,
        ucs_version: &str,
        context: &DescriptorContext,
    ) -> Result<App> {
        let path = path.as_ref();
        let ini = Ini::load_from_file(path).map_err(|e| AppError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let component_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let meta_path = path.with_extension("meta");
        let meta = if meta_path.exists() {
            Some(Ini::load_from_file(&meta_path).map_err(|e| AppError::Read {
                path: meta_path.clone(),
                message: e.to_string(),
            })?)
        } else {
            None
        };

        let reader = DescriptorReader {
            path,
            ini: &ini,
            meta: meta.as_ref(),
            locale,
        };
        reader.build(component_id, ucs_version, context)
    }

    /// Whether the app runs in a container
    pub fn docker(&self) -> bool {
        self.docker_image.is_some() || self.docker_main_service.is_some()
    }

    pub fn loose_version(&self) -> LooseVersion {
        LooseVersion::new(&self.version)
    }

    /// Whether this entry may be offered on a system running `current`
    pub fn supports_ucs_version(&self, current: &str) -> bool {
        if self.supported_ucs_versions.is_empty() {
            return self.ucs_version == current;
        }
        let prefix = format!("{}-", current);
        self.supported_ucs_versions
            .iter()
            .any(|supported| supported.starts_with(&prefix))
    }

    pub fn is_installed(&self, registry: &dyn InstalledRegistry) -> bool {
        registry.is_installed(&self.id, &self.version)
    }

    /// Whether the current system is allowed to install this entry
    pub fn install_permissions_exist(&self, permissions: &dyn InstallPermissions) -> bool {
        if !self.docker() || !self.install_permissions {
            return true;
        }
        permissions.has_access(self)
    }

    /// Total catalog order: id, platform version, version, component id
    pub fn catalog_cmp(&self, other: &App) -> Ordering {
        self.id
            .cmp(&other.id)
            .then_with(|| version::compare(&self.ucs_version, &other.ucs_version))
            .then_with(|| version::compare(&self.version, &other.version))
            .then_with(|| self.component_id.cmp(&other.component_id))
    }
}

impl PartialOrd for App {
    /// Entries with the same identity but different attributes are unordered
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.catalog_cmp(other) {
            Ordering::Equal if self != other => None,
            ordering => Some(ordering),
        }
    }
}

impl fmt::Display for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.id, self.version)
    }
}

/// Looks up raw attribute values in a descriptor and its meta file
struct DescriptorReader<'a> {
    path: &'a Path,
    ini: &'a Ini,
    meta: Option<&'a Ini>,
    locale: Option<&'a str>,
}

fn lookup<'i>(ini: &'i Ini, section: &str, key: &str) -> Option<&'i str> {
    ini.section(Some(section))?
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

impl<'a> DescriptorReader<'a> {
    fn raw(&self, attribute: &str, localisable: bool) -> Option<&'a str> {
        let key = attribute.replace('_', "");
        let mut sources: Vec<(&Ini, &str)> = Vec::with_capacity(4);
        if let Some(meta) = self.meta {
            if localisable {
                if let Some(locale) = self.locale {
                    sources.push((meta, locale));
                }
            }
            sources.push((meta, "Application"));
        }
        if localisable {
            if let Some(locale) = self.locale {
                sources.push((self.ini, locale));
            }
        }
        sources.push((self.ini, "Application"));

        sources
            .into_iter()
            .find_map(|(ini, section)| lookup(ini, section, &key))
    }

    fn invalid(&self, attribute: &str, value: &str, reason: &str) -> AppError {
        AppError::InvalidAttribute {
            path: self.path.to_path_buf(),
            attribute: attribute.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    fn string(&self, attribute: &str, localisable: bool) -> Option<String> {
        self.raw(attribute, localisable).map(|v| v.to_string())
    }

    fn required(&self, attribute: &str, localisable: bool) -> Result<String> {
        match self.raw(attribute, localisable) {
            Some(v) if !v.is_empty() => Ok(v.to_string()),
            _ => Err(AppError::MissingAttribute {
                path: self.path.to_path_buf(),
                attribute: attribute.to_string(),
            }),
        }
    }

    fn list(&self, attribute: &str, localisable: bool) -> Vec<String> {
        match self.raw(attribute, localisable) {
            Some(v) if !v.trim().is_empty() => v.split(',').map(|s| s.trim().to_string()).collect(),
            _ => Vec::new(),
        }
    }

    fn boolean(&self, attribute: &str, default: bool) -> Result<bool> {
        let Some(value) = self.raw(attribute, false) else {
            return Ok(default);
        };
        match value.to_lowercase().as_str() {
            "1" | "yes" | "true" | "on" => Ok(true),
            "0" | "no" | "false" | "off" => Ok(false),
            _ => Err(self.invalid(attribute, value, "not a boolean")),
        }
    }

    fn integer(&self, attribute: &str, default: i64) -> Result<i64> {
        let Some(value) = self.raw(attribute, false) else {
            return Ok(default);
        };
        value
            .trim()
            .parse()
            .map_err(|_| self.invalid(attribute, value, "not an integer"))
    }

    fn check_pattern(&self, attribute: &str, value: &str, pattern: &str) -> Result<()> {
        let regex = Regex::new(pattern).map_err(|e| self.invalid(attribute, value, &e.to_string()))?;
        if regex.is_match(value) {
            Ok(())
        } else {
            Err(self.invalid(attribute, value, "invalid format"))
        }
    }

    fn check_choices(&self, attribute: &str, values: &[String], choices: &[&str]) -> Result<()> {
        match values.iter().find(|v| !choices.contains(&v.as_str())) {
            Some(bad) => Err(self.invalid(attribute, bad, "not allowed")),
            None => Ok(()),
        }
    }

    fn ratings(&self, definitions: &[RatingDefinition]) -> Vec<Rating> {
        let Some(meta) = self.meta else {
            return Vec::new();
        };
        definitions
            .iter()
            .filter_map(|def| {
                let value = lookup(meta, "Application", &def.name)?.trim().parse().ok()?;
                Some(Rating {
                    name: def.name.clone(),
                    label: def.label.clone(),
                    description: def.description.clone(),
                    value,
                })
            })
            .collect()
    }

    fn build(
        &self,
        component_id: String,
        ucs_version: &str,
        context: &DescriptorContext,
    ) -> Result<App> {
        if self.ini.section(Some("Application")).is_none() {
            return Err(AppError::NoApplicationSection {
                path: self.path.to_path_buf(),
            });
        }

        let defaults = App::default();

        let id = self.required("id", false)?;
        self.check_pattern("id", &id, APP_ID_PATTERN)?;
        let code = self.required("code", false)?;
        self.check_pattern("code", &code, APP_CODE_PATTERN)?;

        let required_ucs_version = self.string("required_ucs_version", false);
        if let Some(v) = &required_ucs_version {
            self.check_pattern("required_ucs_version", v, UCS_VERSION_PATTERN)?;
        }
        let supported_ucs_versions = self.list("supported_ucs_versions", false);
        for v in &supported_ucs_versions {
            self.check_pattern("supported_ucs_versions", v, UCS_VERSION_PATTERN)?;
        }

        let server_role = match self.list("server_role", false) {
            roles if roles.is_empty() => defaults.server_role.clone(),
            roles => roles,
        };
        self.check_choices("server_role", &server_role, SERVER_ROLES)?;
        let supported_architectures = match self.list("supported_architectures", false) {
            archs if archs.is_empty() => defaults.supported_architectures.clone(),
            archs => archs,
        };
        self.check_choices("supported_architectures", &supported_architectures, ARCHITECTURES)?;

        let web_interface_proxy_scheme = self
            .string("web_interface_proxy_scheme", false)
            .unwrap_or(defaults.web_interface_proxy_scheme.clone());
        self.check_choices(
            "web_interface_proxy_scheme",
            std::slice::from_ref(&web_interface_proxy_scheme),
            PROXY_SCHEMES,
        )?;

        let app_categories = self
            .list("app_categories", false)
            .into_iter()
            .map(|c| {
                context
                    .app_categories
                    .get(&c.to_lowercase())
                    .cloned()
                    .unwrap_or(c)
            })
            .collect();

        let mut app = App {
            id,
            code,
            component_id,
            ucs_version: ucs_version.to_string(),
            name: self.required("name", true)?,
            version: self.required("version", false)?,
            install_permissions: self.boolean("install_permissions", false)?,
            install_permissions_message: self.string("install_permissions_message", true),
            description: self.string("description", true),
            long_description: self.string("long_description", true),
            thumbnails: self.list("thumbnails", true),
            categories: self.list("categories", false),
            app_categories,
            website: self.string("website", true),
            support_url: self.string("support_url", true),
            contact: self.string("contact", false),
            vendor: self.string("vendor", false),
            maintainer: self.string("maintainer", false),
            license: self.string("license", false).unwrap_or(defaults.license),
            notify_vendor: self.boolean("notify_vendor", true)?,
            web_interface: self.string("web_interface", false),
            web_interface_name: self.string("web_interface_name", true),
            web_interface_proxy_scheme,
            plugin_of: self.string("plugin_of", false),
            conflicted_apps: self.list("conflicted_apps", false),
            required_apps: self.list("required_apps", false),
            required_apps_in_domain: self.list("required_apps_in_domain", false),
            conflicted_system_packages: self.list("conflicted_system_packages", false),
            required_ucs_version,
            supported_ucs_versions,
            required_app_version_upgrade: self.string("required_app_version_upgrade", false),
            end_of_life: self.boolean("end_of_life", false)?,
            without_repository: self.boolean("without_repository", false)?,
            default_packages: self.list("default_packages", false),
            server_role,
            supported_architectures,
            min_physical_ram: self.integer("min_physical_ram", defaults.min_physical_ram)?,
            min_free_disk_space: self.integer("min_free_disk_space", defaults.min_free_disk_space)?,
            shop_url: self.string("shop_url", true),
            docker_image: self.string("docker_image", false),
            docker_main_service: self.string("docker_main_service", false),
            docker_migration_works: self.boolean("docker_migration_works", false)?,
            docker_migration_link: self.string("docker_migration_link", false),
            docker_allowed_images: self.list("docker_allowed_images", false),
            rating: self.ratings(&context.ratings),
            vote_for_app: self.boolean("vote_for_app", false)?,
        };

        // containers only ship for amd64
        if app.docker() {
            app.supported_architectures = vec!["amd64".to_string()];
        }
        Ok(app)
    }
}
