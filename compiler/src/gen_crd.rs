use protocrd_schema::{
    CrdNames, CrdSpec, CrdValidation, CrdVersion, CustomResourceDefinition, JsonSchemaProps,
    ObjectMeta, Subresources, CRD_API_VERSION, CRD_KIND,
};
use tracing::info;

use crate::{
    compiler::SchemaSet,
    config::{Config, Resource},
    error::CrdError,
    utils::quote,
};

/// Builds one CRD per configured resource, in configuration order.
pub fn generate_crds(schemas: &SchemaSet, config: &Config) -> Result<Vec<CustomResourceDefinition>, CrdError> {
    config.validate()?;
    config
        .resources
        .iter()
        .map(|res| generate_crd(schemas, res))
        .collect()
}

pub fn generate_crd(schemas: &SchemaSet, res: &Resource) -> Result<CustomResourceDefinition, CrdError> {
    let spec = schemas.get(&res.message).ok_or_else(|| {
        CrdError::Config(format!(
            "message {} for kind {} is not defined in the schema",
            quote(&res.message),
            quote(&res.kind)
        ))
    })?;

    let mut root = JsonSchemaProps::object();
    root.properties.insert("spec".to_string(), spec.clone());
    root.properties.insert("status".to_string(), JsonSchemaProps::preserved_object());

    let storage = res.storage_version().unwrap_or_default();
    let versions = res
        .versions
        .iter()
        .map(|name| CrdVersion {
            name:         name.clone(),
            schema:       CrdValidation { open_api_v3_schema: root.clone() },
            served:       true,
            storage:      name == storage,
            subresources: Some(Subresources { status: Some(Default::default()) }),
        })
        .collect();

    info!(name = %res.crd_name(), message = %res.message, "generated CRD");
    Ok(CustomResourceDefinition {
        api_version: CRD_API_VERSION.to_string(),
        kind:        CRD_KIND.to_string(),
        metadata: ObjectMeta {
            annotations: res.annotations.clone(),
            labels:      res.labels.clone(),
            name:        res.crd_name(),
        },
        spec: CrdSpec {
            group: res.group.clone(),
            names: CrdNames {
                categories:  res.categories.clone(),
                kind:        res.kind.clone(),
                list_kind:   format!("{}List", res.kind),
                plural:      res.plural(),
                short_names: res.short_names.clone(),
                singular:    res.kind.to_lowercase(),
            },
            scope: res.scope.as_str().to_string(),
            versions,
        },
    })
}

/// Multi-document YAML, one `---` separated document per CRD.
pub fn to_yaml(crds: &[CustomResourceDefinition]) -> Result<String, CrdError> {
    let mut out = String::new();
    for crd in crds {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(crd)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_schema;

    const PROTO: &str = r#"
syntax = "proto3";
package demo.v1;

// Gateway describes a load balancer.
message GatewaySpec {
  // +kubebuilder:validation:MaxItems=8
  repeated string hosts = 1;
}
"#;

    const CONFIG: &str = r#"
resources:
  - message: demo.v1.GatewaySpec
    group: networking.example.io
    kind: Gateway
    versions: [v1beta1, v1]
    storageVersion: v1
    labels: {app: demo}
"#;

    #[test]
    fn test_generate_crd() {
        let (_, schemas) = compile_schema(PROTO).unwrap();
        let config = Config::from_yaml(CONFIG).unwrap();
        let crds = generate_crds(&schemas, &config).unwrap();
        assert_eq!(crds.len(), 1);

        let crd = &crds[0];
        assert_eq!(crd.metadata.name, "gateways.networking.example.io");
        assert_eq!(crd.metadata.labels["app"], "demo");
        assert_eq!(crd.spec.names.list_kind, "GatewayList");
        assert_eq!(crd.spec.names.singular, "gateway");
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(crd.storage_version().map(|v| v.name.as_str()), Some("v1"));
        assert!(crd.spec.versions.iter().all(|v| v.served));

        let root = crd.schema_for("networking.example.io/v1beta1", "Gateway").unwrap();
        let spec = &root.properties["spec"];
        assert_eq!(spec.description.as_deref(), Some("Gateway describes a load balancer."));
        assert_eq!(spec.properties["hosts"].max_items, Some(8));
        assert_eq!(root.properties["status"], JsonSchemaProps::preserved_object());
    }

    #[test]
    fn test_yaml_documents() {
        let (_, schemas) = compile_schema(PROTO).unwrap();
        let config = Config::from_yaml(CONFIG).unwrap();
        let yaml = to_yaml(&generate_crds(&schemas, &config).unwrap()).unwrap();
        assert!(yaml.starts_with("---\napiVersion: apiextensions.k8s.io/v1\n"));
        assert!(yaml.contains("openAPIV3Schema:"));
        assert!(yaml.contains("status: {}"));

        let again = to_yaml(&generate_crds(&schemas, &config).unwrap()).unwrap();
        assert_eq!(yaml, again);
    }

    #[test]
    fn test_missing_message() {
        let (_, schemas) = compile_schema(PROTO).unwrap();
        let config = Config::from_yaml(
            "resources:\n  - {message: demo.v1.Missing, group: g.io, kind: Missing, versions: [v1]}",
        )
        .unwrap();
        let err = generate_crds(&schemas, &config).unwrap_err();
        assert!(err.to_string().contains("demo.v1.Missing"), "{}", err);
    }
}
