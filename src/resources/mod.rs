//! Resource generation module.
//!
//! Contains utilities for generating Kubernetes resources owned by an
//! InstallRequest.
//!
//! ## Resources Generated
//!
//! | Resource | Purpose |
//! |----------|---------|
//! | Job | Runs the package installer once and prints its manifests |

pub mod common;
pub mod install_job;

// Re-export commonly used items
pub use common::{owner_reference, standard_labels};
pub use install_job::{generate_install_job, job_name};
