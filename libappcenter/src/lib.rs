//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

pub mod app;
pub mod cache;
pub mod candidate;
pub mod config;
pub mod installed;
pub mod requirements;
pub mod resolver;
pub mod version;
pub mod view;

pub use app::App;
pub use cache::{CacheError, CacheRegistry, FederatedCatalog, LocalCatalogCache};
pub use candidate::{Candidate, CandidateSelector};
pub use config::AppCenterConfig;
pub use requirements::{RequirementChecker, RequirementError};
pub use resolver::{Action, DependencyResolver, ResolveError};
pub use view::{CatalogView, ViewFilter};
