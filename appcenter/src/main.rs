//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

mod config;
mod error;

use clap::{Parser, Subcommand};
use config::{ConfigFile, Overrides, Settings};
use error::{AppCenterCliError, Result};
use libappcenter::installed::{DomainInventory, StatusFileRegistry};
use libappcenter::{
    Action, App, CacheRegistry, Candidate, CatalogView, DependencyResolver, RequirementChecker,
    ViewFilter,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "appcenter")]
#[command(author, version, about = "Query the App Center catalog and order app installations", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// KDL config file
    #[arg(short, long, value_name = "FILE", global = true, env = "APPCENTER_CONFIG")]
    config: Option<PathBuf>,

    /// Root directory of the catalog caches
    #[arg(long, value_name = "DIR", global = true, env = "APPCENTER_CACHE_ROOT")]
    cache_root: Option<PathBuf>,

    /// App Center server
    #[arg(long, global = true, env = "APPCENTER_SERVER")]
    server: Option<String>,

    /// Platform version of this host
    #[arg(long, global = true, env = "APPCENTER_UCS_VERSION")]
    ucs_version: Option<String>,

    #[arg(long, global = true, env = "APPCENTER_LOCALE")]
    locale: Option<String>,

    /// Host configuration registry holding the installed app versions
    #[arg(long, value_name = "FILE", global = true, env = "APPCENTER_STATUS_FILE")]
    status_file: Option<PathBuf>,

    /// Show entries of every compatible platform version
    #[arg(long, global = true)]
    all_apps: bool,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List apps, one entry per app unless --all-versions is given
    List {
        /// Show every version instead of the preferred one
        #[arg(long)]
        all_versions: bool,

        /// Only show locally installed apps
        #[arg(long)]
        installed: bool,

        /// Output format: table (default) or json
        #[arg(short = 'o', long)]
        output_format: Option<String>,
    },

    /// Show one app
    Info {
        /// App id, optionally with `=version`
        app: String,

        /// Prefer the newest version over the installed one
        #[arg(long)]
        latest: bool,

        /// Output format: table (default) or json
        #[arg(short = 'o', long)]
        output_format: Option<String>,
    },

    /// Show the version an installed app would be upgraded to
    Candidate {
        /// App id
        app: String,
    },

    /// Print the order in which apps have to be installed or removed
    Resolve {
        /// install, upgrade or remove
        action: Action,

        /// App ids, optionally with `=version`
        #[arg(required = true)]
        apps: Vec<String>,
    },

    /// Check whether apps may be installed, upgraded or removed
    Check {
        /// install, upgrade or remove
        action: Action,

        /// App ids, optionally with `=version`
        #[arg(required = true)]
        apps: Vec<String>,
    },

    /// Show installed apps that require an app
    Dependents {
        app: String,
    },

    /// Delete the snapshots and forget the side tables
    ClearCache,
}

/// App as printed by `list` and `info`
#[derive(Serialize)]
struct AppOutput<'a> {
    id: &'a str,
    version: &'a str,
    ucs_version: &'a str,
    component_id: &'a str,
    name: &'a str,
    installed: bool,
}

fn split_app_arg(arg: &str) -> (&str, Option<&str>) {
    match arg.split_once('=') {
        Some((id, version)) => (id, Some(version)),
        None => (arg, None),
    }
}

fn print_apps(view: &CatalogView, apps: &[Arc<App>], output_format: Option<&str>) -> Result<()> {
    let rows: Vec<AppOutput> = apps
        .iter()
        .map(|app| AppOutput {
            id: &app.id,
            version: &app.version,
            ucs_version: &app.ucs_version,
            component_id: &app.component_id,
            name: &app.name,
            installed: view.is_installed(app),
        })
        .collect();

    match output_format.unwrap_or("table") {
        "table" => {
            for row in rows {
                println!(
                    "{}\t{}\t{}\t{}",
                    row.id,
                    row.version,
                    row.ucs_version,
                    if row.installed { "installed" } else { "-" }
                );
            }
            Ok(())
        }
        "json" => {
            println!("{}", serde_json::to_string_pretty(&rows)?);
            Ok(())
        }
        other => Err(AppCenterCliError::UnsupportedOutputFormat(other.to_string())),
    }
}

/// Look up the apps named on the command line; removals use the installed
/// entries, everything else the newest ones
fn find_requested(view: &CatalogView, args: &[String], action: Action) -> Result<Vec<Arc<App>>> {
    let latest = action != Action::Remove;
    let mut requested = Vec::with_capacity(args.len());
    for arg in args {
        let (id, version) = split_app_arg(arg);
        let found = view
            .find(id, version, latest)?
            .ok_or_else(|| AppCenterCliError::AppNotFound(arg.clone()))?;
        requested.push(found);
    }
    Ok(requested)
}

fn load_domain(settings: &Settings) -> Result<DomainInventory> {
    let inventory = match &settings.domain_inventory {
        Some(path) => DomainInventory::load(path)?,
        None => DomainInventory::default(),
    };
    Ok(match &settings.hostname {
        Some(host) => inventory.with_local_host(host),
        None => inventory,
    })
}

fn run(cli: Cli) -> Result<()> {
    let file = ConfigFile::load(cli.config.as_deref())?;
    let settings = Settings::resolve(
        file,
        Overrides {
            cache_root: cli.cache_root,
            server: cli.server,
            ucs_version: cli.ucs_version,
            locale: cli.locale,
            status_file: cli.status_file,
        },
    );
    debug!("Settings: {:?}", settings);

    let registry = CacheRegistry::from_config(&settings.appcenter);
    let catalog = registry.federated(&settings.appcenter)?;
    let installed = StatusFileRegistry::load(&settings.status_file)?;
    let filter = if cli.all_apps {
        ViewFilter::AllApps
    } else {
        ViewFilter::Apps
    };
    let view = CatalogView::new(Arc::clone(&catalog), filter, Arc::new(installed));

    match cli.command {
        Commands::List {
            all_versions,
            installed,
            output_format,
        } => {
            let apps = if installed {
                view.get_all_locally_installed_apps()?
            } else if all_versions {
                view.get_every_single_app()?
            } else {
                view.get_all_apps()?
            };
            print_apps(&view, &apps, output_format.as_deref())
        }
        Commands::Info {
            app,
            latest,
            output_format,
        } => {
            let (id, version) = split_app_arg(&app);
            let found = view
                .find(id, version, latest)?
                .ok_or_else(|| AppCenterCliError::AppNotFound(app.clone()))?;
            if output_format.as_deref().unwrap_or("table") == "table" {
                println!("{}", found);
                println!("name: {}", found.name);
                println!("platform version: {}", found.ucs_version);
                println!("component: {}", found.component_id);
                if let Some(description) = &found.description {
                    println!("description: {}", description);
                }
                if !found.required_apps.is_empty() {
                    println!("requires: {}", found.required_apps.join(", "));
                }
                if let Some(license) = catalog.license_description(&found) {
                    println!("license: {}", license);
                }
                println!("installed: {}", view.is_installed(&found));
                Ok(())
            } else {
                print_apps(&view, &[found], output_format.as_deref())
            }
        }
        Commands::Candidate { app } => {
            let current = view
                .find(&app, None, false)?
                .filter(|found| view.is_installed(found))
                .ok_or_else(|| AppCenterCliError::AppNotInstalled(app.clone()))?;
            match view.find_candidate(&current)? {
                Some(Candidate::Eligible(next)) => println!("{}", next),
                Some(Candidate::NotPermitted(next)) => println!("{} (not permitted)", next),
                None => println!("{} is up to date", current),
            }
            Ok(())
        }
        Commands::Resolve { action, apps } => {
            let requested = find_requested(&view, &apps, action)?;
            let domain = load_domain(&settings)?;
            info!("Resolving {} for {} apps", action, requested.len());
            let order = DependencyResolver::new(&view, &domain).resolve(&requested, action)?;
            for app in order {
                println!("{}", app);
            }
            Ok(())
        }
        Commands::Check { action, apps } => {
            let requested = find_requested(&view, &apps, action)?;
            let domain = load_domain(&settings)?;
            let errors = RequirementChecker::new(&view, &domain).check(&requested, action)?;
            for error in &errors {
                println!("{}: {}", error.app(), error);
            }
            if errors.is_empty() {
                println!("{} possible", action);
                Ok(())
            } else {
                Err(AppCenterCliError::RequirementsNotMet {
                    action: action.to_string(),
                    count: errors.len(),
                })
            }
        }
        Commands::Dependents { app } => {
            for dependent in view.dependents_of(&app)? {
                println!("{}", dependent);
            }
            Ok(())
        }
        Commands::ClearCache => {
            catalog.clear_cache()?;
            info!("Cleared catalog caches");
            Ok(())
        }
    }
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env()
        .map_err(|e| {
            AppCenterCliError::LoggingEnvError(format!("Failed to parse environment filter: {}", e))
        })?;

    fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .without_time()
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    run(cli)?;
    Ok(())
}
