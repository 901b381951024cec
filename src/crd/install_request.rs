//! InstallRequest Custom Resource Definition.
//!
//! An InstallRequest declares a package that should be installed into the
//! cluster. The operator runs an installer job for it and records the
//! outcome in the status.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::condition::{CONDITION_READY, Condition, Conditions};

/// InstallRequest is a custom resource asking the operator to install a package.
///
/// Example:
/// ```yaml
/// apiVersion: packageoperator.smoketurner.com/v1alpha1
/// kind: InstallRequest
/// metadata:
///   name: sample-package
/// spec:
///   package: crossplane/sample-stack:latest
///   source: registry.hub.docker.com
/// ```
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "packageoperator.smoketurner.com",
    version = "v1alpha1",
    kind = "InstallRequest",
    plural = "installrequests",
    shortname = "ir",
    status = "InstallRequestStatus",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"Package", "type":"string", "jsonPath":".spec.package"}"#,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].reason"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct InstallRequestSpec {
    /// Package image to install (e.g. `crossplane/sample-stack:latest`).
    pub package: String,

    /// Optional registry the package is pulled from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl InstallRequestSpec {
    /// Full image reference of the package, see [`resolve_package_image`].
    pub fn package_image(&self) -> String {
        resolve_package_image(self)
    }
}

/// Status of an InstallRequest.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstallRequestStatus {
    /// Conditions describing the current state.
    #[serde(default)]
    #[schemars(with = "Vec<Condition>")]
    pub conditions: Conditions,

    /// The installer job created for this request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_job: Option<ObjectRef>,

    /// The package record created from the installer output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_record: Option<ObjectRef>,
}

impl InstallRequestStatus {
    /// True once the package record exists and the request is `Ready`.
    pub fn is_installed(&self) -> bool {
        self.package_record.is_some() && self.conditions.is_true(CONDITION_READY)
    }
}

/// Reference to a namespaced object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl InstallRequest {
    /// Status of the request, creating an empty one if none is set.
    pub fn status_or_default(&mut self) -> &mut InstallRequestStatus {
        self.status.get_or_insert_with(InstallRequestStatus::default)
    }

    /// The installer job reference, if one was recorded.
    pub fn install_job(&self) -> Option<&ObjectRef> {
        self.status.as_ref().and_then(|s| s.install_job.as_ref())
    }

    /// The package record reference, if one was recorded.
    pub fn package_record(&self) -> Option<&ObjectRef> {
        self.status.as_ref().and_then(|s| s.package_record.as_ref())
    }
}

/// Resolve the image to pull for a package.
///
/// Returns `package` unchanged when no source is set, otherwise
/// `source/package`.
pub fn resolve_package_image(spec: &InstallRequestSpec) -> String {
    match spec.source.as_deref() {
        Some(source) if !source.is_empty() => format!("{}/{}", source, spec.package),
        _ => spec.package.clone(),
    }
}
