use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::props::JsonSchemaProps;

pub const CRD_API_VERSION: &str = "apiextensions.k8s.io/v1";
pub const CRD_KIND:        &str = "CustomResourceDefinition";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomResourceDefinition {
    pub api_version: String,
    pub kind:        String,
    pub metadata:    ObjectMeta,
    pub spec:        CrdSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub labels:      BTreeMap<String, String>,
    pub name:        String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrdSpec {
    pub group:    String,
    pub names:    CrdNames,
    pub scope:    String,
    pub versions: Vec<CrdVersion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrdNames {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub categories:  Vec<String>,
    pub kind:        String,
    pub list_kind:   String,
    pub plural:      String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub short_names: Vec<String>,
    pub singular:    String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrdVersion {
    pub name:         String,
    pub schema:       CrdValidation,
    pub served:       bool,
    pub storage:      bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub subresources: Option<Subresources>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrdValidation {
    #[serde(rename = "openAPIV3Schema")]
    pub open_api_v3_schema: JsonSchemaProps,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subresources {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status: Option<serde_json::Map<String, serde_json::Value>>,
}

impl CustomResourceDefinition {
    /// Returns the schema served for `apiVersion` (`group/version`) and `kind`,
    /// if this CRD defines it.
    pub fn schema_for(&self, api_version: &str, kind: &str) -> Option<&JsonSchemaProps> {
        if kind != self.spec.names.kind {
            return None;
        }
        let (group, version) = api_version.split_once('/')?;
        if group != self.spec.group {
            return None;
        }
        self.spec
            .versions
            .iter()
            .find(|v| v.name == version && v.served)
            .map(|v| &v.schema.open_api_v3_schema)
    }

    pub fn storage_version(&self) -> Option<&CrdVersion> {
        self.spec.versions.iter().find(|v| v.storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CustomResourceDefinition {
        let version = |name: &str, storage: bool| CrdVersion {
            name:         name.to_string(),
            schema:       CrdValidation { open_api_v3_schema: JsonSchemaProps::object() },
            served:       true,
            storage,
            subresources: None,
        };
        CustomResourceDefinition {
            api_version: CRD_API_VERSION.to_string(),
            kind:        CRD_KIND.to_string(),
            metadata:    ObjectMeta { name: "gateways.networking.example.io".into(), ..Default::default() },
            spec: CrdSpec {
                group: "networking.example.io".into(),
                names: CrdNames {
                    categories:  vec![],
                    kind:        "Gateway".into(),
                    list_kind:   "GatewayList".into(),
                    plural:      "gateways".into(),
                    short_names: vec!["gw".into()],
                    singular:    "gateway".into(),
                },
                scope:    "Namespaced".into(),
                versions: vec![version("v1", true), version("v1beta1", false)],
            },
        }
    }

    #[test]
    fn test_schema_lookup() {
        let crd = sample();
        assert!(crd.schema_for("networking.example.io/v1beta1", "Gateway").is_some());
        assert!(crd.schema_for("networking.example.io/v2", "Gateway").is_none());
        assert!(crd.schema_for("other.io/v1", "Gateway").is_none());
        assert!(crd.schema_for("networking.example.io/v1", "Sidecar").is_none());
        assert!(crd.schema_for("v1", "Gateway").is_none());
        assert_eq!(crd.storage_version().map(|v| v.name.as_str()), Some("v1"));
    }

    #[test]
    fn test_manifest_keys() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["apiVersion"], CRD_API_VERSION);
        assert_eq!(json["spec"]["names"]["listKind"], "GatewayList");
        assert_eq!(json["spec"]["names"]["shortNames"][0], "gw");
        assert!(json["spec"]["names"].get("categories").is_none());
        assert_eq!(json["spec"]["versions"][0]["schema"]["openAPIV3Schema"]["type"], "object");
    }
}
