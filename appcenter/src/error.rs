//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use libappcenter::cache::CacheError;
use libappcenter::config::ConfigError;
use libappcenter::installed::InstalledError;
use libappcenter::resolver::ResolveError;
use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for appcenter operations
pub type Result<T> = std::result::Result<T, AppCenterCliError>;

/// Errors that can occur in appcenter operations
#[derive(Debug, Error, Diagnostic)]
pub enum AppCenterCliError {
    #[error("failed to read config file {path}: {source}")]
    #[diagnostic(
        code(appcenter::cli::config_read),
        help("Check that the config file exists and is readable")
    )]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    #[diagnostic(
        code(appcenter::cli::config_parse),
        help("The config file is KDL, e.g. `ucs-version \"5.0\"`")
    )]
    ConfigParse { path: PathBuf, message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Installed(#[from] InstalledError),

    #[error("JSON error: {0}")]
    #[diagnostic(
        code(appcenter::cli::json_error),
        help("This is likely a bug in the code")
    )]
    JsonError(#[from] serde_json::Error),

    #[error("app {0} not found")]
    #[diagnostic(
        code(appcenter::cli::app_not_found),
        help("Use `appcenter list --all-apps` to see every known app")
    )]
    AppNotFound(String),

    #[error("app {0} is not installed")]
    #[diagnostic(
        code(appcenter::cli::app_not_installed),
        help("Only installed apps have upgrade candidates")
    )]
    AppNotInstalled(String),

    #[error("{count} requirements for {action} are not met")]
    #[diagnostic(
        code(appcenter::cli::requirements_not_met),
        help("Resolve the problems listed above and try again")
    )]
    RequirementsNotMet { action: String, count: usize },

    #[error("logging environment setup error: {0}")]
    #[diagnostic(
        code(appcenter::cli::logging_env_error),
        help("Check the RUST_LOG environment variable")
    )]
    LoggingEnvError(String),

    #[error("unsupported output format: {0}")]
    #[diagnostic(
        code(appcenter::cli::unsupported_output_format),
        help("Supported output formats: table, json")
    )]
    UnsupportedOutputFormat(String),
}
