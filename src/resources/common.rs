//! Common resource generation utilities.
//!
//! Labels and owner references shared by everything the operator creates on
//! behalf of an InstallRequest.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

use crate::crd::InstallRequest;

/// Value of the `app.kubernetes.io/managed-by` label
pub const MANAGED_BY: &str = "package-operator";

/// Standard labels applied to all managed resources
pub fn standard_labels(request: &InstallRequest) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_string(), request.name_any());
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        MANAGED_BY.to_string(),
    );
    labels.insert(
        "app.kubernetes.io/component".to_string(),
        "installer".to_string(),
    );
    labels
}

/// Create owner reference for an InstallRequest
pub fn owner_reference(request: &InstallRequest) -> OwnerReference {
    OwnerReference {
        api_version: InstallRequest::api_version(&()).to_string(),
        kind: InstallRequest::kind(&()).to_string(),
        name: request.name_any(),
        uid: request.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}
