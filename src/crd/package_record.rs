//! PackageRecord Custom Resource Definition.
//!
//! A PackageRecord describes an installed package. It is never written by
//! users: the installer job prints it and the operator creates it next to the
//! InstallRequest that asked for the package.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::condition::{Condition, Conditions};

/// PackageRecord is the descriptor of an installed package.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "packageoperator.smoketurner.com",
    version = "v1alpha1",
    kind = "PackageRecord",
    plural = "packagerecords",
    shortname = "pkgrec",
    status = "PackageRecordStatus",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"Title", "type":"string", "jsonPath":".spec.title"}"#,
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase", default)]
pub struct PackageRecordSpec {
    /// Human-readable package title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Package version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Markdown description of the package.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Publishing company.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,

    /// SPDX license identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    pub keywords: Vec<String>,

    pub maintainers: Vec<Contributor>,

    pub owners: Vec<Contributor>,

    pub links: Vec<Link>,

    /// Custom resource types owned by the package.
    #[serde(rename = "customresourcedefinitions")]
    pub custom_resource_definitions: OwnedTypes,
}

/// A person responsible for the package.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct Contributor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// A link to package documentation or sources.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct Link {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub url: String,
}

/// Types a package owns.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct OwnedTypes {
    pub owns: Vec<TypeReference>,
}

/// Reference to a resource type by apiVersion and kind.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TypeReference {
    pub api_version: String,
    pub kind: String,
}

/// Status of a PackageRecord.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PackageRecordStatus {
    #[serde(default)]
    #[schemars(with = "Vec<Condition>")]
    pub conditions: Conditions,
}
