//! Custom Resource Definitions (CRDs) for package-operator.
//!
//! - `InstallRequest`: Declares a package to install into the cluster
//! - `PackageRecord`: Descriptor of an installed package, produced by the installer job

mod condition;
mod install_request;
mod package_record;

pub use condition::*;
pub use install_request::*;
pub use package_record::*;

/// API group shared by all package-operator resources.
pub const API_GROUP: &str = "packageoperator.smoketurner.com";

/// API version shared by all package-operator resources.
pub const API_VERSION: &str = "v1alpha1";
