//! Parsing of installer job output.
//!
//! The installer prints a stream of YAML documents separated by `---`: zero
//! or more CustomResourceDefinitions followed by exactly one PackageRecord.
//! A [`ManifestRegistry`] maps each document's group and kind to the way it
//! is decoded. The registry is built by the caller and handed to whatever
//! needs it; there is no process-wide type registration.

use std::collections::HashMap;

use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::crd::{API_GROUP, PackageRecord};

/// Group of CustomResourceDefinition documents.
pub const CRD_GROUP: &str = "apiextensions.k8s.io";
/// Kind of CustomResourceDefinition documents.
pub const CRD_KIND: &str = "CustomResourceDefinition";
/// Kind of the package record document.
pub const PACKAGE_RECORD_KIND: &str = "PackageRecord";

/// Errors raised while parsing installer output.
///
/// Documents are numbered from 1 in the order they appear in the output.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("document {index} is not valid YAML: {source}")]
    Yaml {
        index: usize,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("document {index} is not a mapping")]
    NotAMapping { index: usize },

    #[error("document {index} has no {field}")]
    MissingField { index: usize, field: &'static str },

    #[error("document {index} of kind {kind} could not be decoded: {source}")]
    Decode {
        index: usize,
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// How a document kind is treated by the job completer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManifestClass {
    /// A schema the package owns, created cluster-wide.
    TypeDefinition,
    /// The package descriptor.
    Record,
}

/// A decoded document from installer output.
#[derive(Clone, Debug)]
pub enum ParsedManifest {
    /// A type definition together with the API resource used to create it.
    TypeDefinition {
        resource: ApiResource,
        object: DynamicObject,
    },
    /// The package record.
    Record(Box<PackageRecord>),
    /// A document of a kind the registry does not know.
    Other { api_version: String, kind: String },
}

impl ParsedManifest {
    pub fn class(&self) -> Option<ManifestClass> {
        match self {
            ParsedManifest::TypeDefinition { .. } => Some(ManifestClass::TypeDefinition),
            ParsedManifest::Record(_) => Some(ManifestClass::Record),
            ParsedManifest::Other { .. } => None,
        }
    }
}

/// Maps (group, kind) pairs to manifest classes.
#[derive(Clone, Debug, Default)]
pub struct ManifestRegistry {
    kinds: HashMap<(String, String), ManifestClass>,
}

impl ManifestRegistry {
    /// An empty registry; every document decodes as [`ParsedManifest::Other`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry knowing CustomResourceDefinitions and PackageRecords.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register(CRD_GROUP, CRD_KIND, ManifestClass::TypeDefinition)
            .register(API_GROUP, PACKAGE_RECORD_KIND, ManifestClass::Record);
        registry
    }

    /// Register a kind of the given API group.
    pub fn register(
        &mut self,
        group: impl Into<String>,
        kind: impl Into<String>,
        class: ManifestClass,
    ) -> &mut Self {
        self.kinds.insert((group.into(), kind.into()), class);
        self
    }

    /// Look up the class of an apiVersion/kind pair.
    pub fn classify(&self, api_version: &str, kind: &str) -> Option<ManifestClass> {
        let (group, _) = split_api_version(api_version);
        self.kinds
            .get(&(group.to_string(), kind.to_string()))
            .copied()
    }

    /// Split installer output into documents and decode each of them.
    ///
    /// Fails on the first document that cannot be decoded; nothing is
    /// returned for the rest of the output in that case.
    pub fn parse(&self, output: &str) -> Result<Vec<ParsedManifest>, ManifestError> {
        split_documents(output)?
            .into_iter()
            .map(|(index, document)| self.decode(index, document))
            .collect()
    }

    /// Decode a single document.
    pub fn decode(
        &self,
        index: usize,
        mut document: Map<String, Value>,
    ) -> Result<ParsedManifest, ManifestError> {
        let api_version = string_field(&document, "apiVersion")
            .ok_or(ManifestError::MissingField {
                index,
                field: "apiVersion",
            })?
            .to_string();
        let kind = string_field(&document, "kind")
            .ok_or(ManifestError::MissingField {
                index,
                field: "kind",
            })?
            .to_string();

        let decode_err = |source| ManifestError::Decode {
            index,
            kind: kind.clone(),
            source,
        };

        document
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));

        match self.classify(&api_version, &kind) {
            Some(ManifestClass::TypeDefinition) => {
                let (group, version) = split_api_version(&api_version);
                let resource = ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, &kind));
                let object: DynamicObject =
                    serde_json::from_value(Value::Object(document)).map_err(decode_err)?;
                Ok(ParsedManifest::TypeDefinition { resource, object })
            }
            Some(ManifestClass::Record) => {
                document
                    .entry("spec")
                    .or_insert_with(|| Value::Object(Map::new()));
                let record: PackageRecord =
                    serde_json::from_value(Value::Object(document)).map_err(decode_err)?;
                Ok(ParsedManifest::Record(Box::new(record)))
            }
            None => Ok(ParsedManifest::Other { api_version, kind }),
        }
    }
}

/// Split a multi-document YAML stream into mappings.
///
/// Empty documents (such as the one before a leading `---`) are skipped.
/// Returns each mapping with its 1-based position in the stream.
pub fn split_documents(output: &str) -> Result<Vec<(usize, Map<String, Value>)>, ManifestError> {
    let mut documents = Vec::new();
    for (i, document) in serde_yaml::Deserializer::from_str(output).enumerate() {
        let index = i + 1;
        let value =
            Value::deserialize(document).map_err(|source| ManifestError::Yaml { index, source })?;
        match value {
            Value::Null => continue,
            Value::Object(map) => documents.push((index, map)),
            _ => return Err(ManifestError::NotAMapping { index }),
        }
    }
    Ok(documents)
}

fn string_field<'a>(document: &'a Map<String, Value>, field: &str) -> Option<&'a str> {
    document
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Split `group/version` into its parts; core types have an empty group.
fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;

    const OUTPUT: &str = r#"
---
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: mytypes.samples.upbound.io
spec:
  group: samples.upbound.io
  scope: Namespaced
---
apiVersion: packageoperator.smoketurner.com/v1alpha1
kind: PackageRecord
metadata:
  creationTimestamp: null
spec:
  title: Sample Stack
  version: 0.0.1
status:
  Conditions: null
"#;

    #[test]
    fn test_parse_crd_and_record() {
        let manifests = ManifestRegistry::with_defaults().parse(OUTPUT).unwrap();
        assert_eq!(manifests.len(), 2);

        match &manifests[0] {
            ParsedManifest::TypeDefinition { resource, object } => {
                assert_eq!(resource.plural, "customresourcedefinitions");
                assert_eq!(resource.group, CRD_GROUP);
                assert_eq!(
                    object.metadata.name.as_deref(),
                    Some("mytypes.samples.upbound.io")
                );
            }
            other => panic!("expected type definition, got {:?}", other),
        }

        match &manifests[1] {
            ParsedManifest::Record(record) => {
                assert_eq!(record.spec.title.as_deref(), Some("Sample Stack"));
                assert_eq!(record.metadata.name, None);
            }
            other => panic!("expected record, got {:?}", other),
        }
    }

    #[test]
    fn test_garbage_is_rejected() {
        let err = ManifestRegistry::with_defaults()
            .parse(")(&not valid yaml?()!")
            .unwrap_err();
        assert!(matches!(err, ManifestError::NotAMapping { index: 1 }));
    }

    #[test]
    fn test_invalid_yaml_is_rejected() {
        let err = ManifestRegistry::with_defaults()
            .parse("kind: [unclosed\n")
            .unwrap_err();
        assert!(matches!(err, ManifestError::Yaml { index: 1, .. }));
    }

    #[test]
    fn test_one_bad_document_rejects_everything() {
        let output = format!("{}\n---\n- just\n- a list\n", OUTPUT);
        let err = ManifestRegistry::with_defaults().parse(&output).unwrap_err();
        assert!(matches!(err, ManifestError::NotAMapping { .. }));
    }

    #[test]
    fn test_missing_kind() {
        let err = ManifestRegistry::with_defaults()
            .parse("apiVersion: v1\nmetadata: {}\n")
            .unwrap_err();
        assert!(matches!(
            err,
            ManifestError::MissingField {
                field: "kind",
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_kind_is_other() {
        let manifests = ManifestRegistry::with_defaults()
            .parse("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: x\n")
            .unwrap();
        assert!(matches!(
            &manifests[0],
            ParsedManifest::Other { kind, .. } if kind == "ConfigMap"
        ));
        assert_eq!(manifests[0].class(), None);
    }

    #[test]
    fn test_empty_registry_classifies_nothing() {
        let manifests = ManifestRegistry::new().parse(OUTPUT).unwrap();
        assert!(manifests.iter().all(|m| m.class().is_none()));
    }

    #[test]
    fn test_empty_documents_are_skipped() {
        let documents = split_documents("---\n---\nkind: A\napiVersion: v1\n---\n").unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].1["kind"], "A");
    }

    #[test]
    fn test_classify_by_group() {
        let registry = ManifestRegistry::with_defaults();
        assert_eq!(
            registry.classify("apiextensions.k8s.io/v1beta1", CRD_KIND),
            Some(ManifestClass::TypeDefinition)
        );
        assert_eq!(registry.classify("other.io/v1", CRD_KIND), None);
        assert_eq!(
            registry.classify("packageoperator.smoketurner.com/v1alpha1", "PackageRecord"),
            Some(ManifestClass::Record)
        );
    }

    #[test]
    fn test_split_api_version() {
        assert_eq!(split_api_version("apps/v1"), ("apps", "v1"));
        assert_eq!(split_api_version("v1"), ("", "v1"));
    }
}
