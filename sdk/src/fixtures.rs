//! Runs `valid.yaml` / `invalid.yaml` fixture documents against generated CRDs.
//!
//! Layout: one directory per resource under a fixture root, each holding
//! either or both files. Every document in `valid.yaml` must be accepted and
//! every document in `invalid.yaml` rejected.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use serde_json::Value as Json;
use tracing::{debug, warn};

use protocrd_compiler::{utils::quote, CrdError};
use protocrd_schema::{validate, CustomResourceDefinition, Violation};

pub const VALID_FILE:   &str = "valid.yaml";
pub const INVALID_FILE: &str = "invalid.yaml";

/// A fixture document whose outcome did not match its file.
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureFailure {
    pub file:           PathBuf,
    /// Zero-based position among the file's non-empty documents.
    pub index:          usize,
    pub name:           Option<String>,
    pub expected_valid: bool,
    pub violations:     Vec<Violation>,
}

impl fmt::Display for FixtureFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} document {}", self.file.display(), self.index)?;
        if let Some(name) = &self.name {
            write!(f, " ({})", name)?;
        }
        if self.expected_valid {
            let reasons: Vec<String> = self.violations.iter().map(|v| v.to_string()).collect();
            write!(f, ": expected valid, got: {}", reasons.join("; "))
        } else {
            write!(f, ": expected invalid but it was accepted")
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FixtureReport {
    pub checked:  usize,
    pub failures: Vec<FixtureFailure>,
}

impl FixtureReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    fn merge(&mut self, other: FixtureReport) {
        self.checked += other.checked;
        self.failures.extend(other.failures);
    }
}

/// Parses a multi-document YAML stream, dropping empty documents.
pub fn load_documents(text: &str) -> Result<Vec<Json>, CrdError> {
    let mut docs = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(text) {
        let value = Json::deserialize(doc)?;
        if !value.is_null() {
            docs.push(value);
        }
    }
    Ok(docs)
}

/// Validates one resource document against the CRD serving its
/// `apiVersion` and `kind`. `apiVersion`, `kind` and `metadata` are not
/// part of the schema and are stripped first.
pub fn validate_document(crds: &[CustomResourceDefinition], doc: &Json) -> Result<Vec<Violation>, CrdError> {
    let obj = doc
        .as_object()
        .ok_or_else(|| CrdError::Config("fixture document is not a mapping".to_string()))?;
    let api_version = obj.get("apiVersion").and_then(Json::as_str).unwrap_or_default();
    let kind = obj.get("kind").and_then(Json::as_str).unwrap_or_default();

    let schema = crds
        .iter()
        .find_map(|crd| crd.schema_for(api_version, kind))
        .ok_or_else(|| {
            CrdError::Config(format!(
                "no CRD serves apiVersion {} kind {}",
                quote(api_version),
                quote(kind)
            ))
        })?;

    let mut body = obj.clone();
    body.remove("apiVersion");
    body.remove("kind");
    body.remove("metadata");
    Ok(validate(schema, &Json::Object(body)))
}

/// Checks every document of one fixture file.
pub fn check_file(crds: &[CustomResourceDefinition], path: &Path, expect_valid: bool) -> Result<FixtureReport, CrdError> {
    let text = fs::read_to_string(path)?;
    let docs = load_documents(&text)?;
    debug!(file = %path.display(), documents = docs.len(), "checking fixtures");

    let mut report = FixtureReport::default();
    for (index, doc) in docs.iter().enumerate() {
        let violations = validate_document(crds, doc)?;
        report.checked += 1;
        if violations.is_empty() == expect_valid {
            continue;
        }
        let failure = FixtureFailure {
            file: path.to_path_buf(),
            index,
            name: doc
                .pointer("/metadata/name")
                .and_then(Json::as_str)
                .map(str::to_string),
            expected_valid: expect_valid,
            violations,
        };
        warn!("{}", failure);
        report.failures.push(failure);
    }
    Ok(report)
}

/// Runs every `<dir>/<resource>/{valid,invalid}.yaml`, in directory name order.
pub fn run_fixtures(crds: &[CustomResourceDefinition], dir: &Path) -> Result<FixtureReport, CrdError> {
    let mut resources = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            resources.push(path);
        }
    }
    resources.sort();

    let mut report = FixtureReport::default();
    for resource in resources {
        for (file, expect_valid) in [(VALID_FILE, true), (INVALID_FILE, false)] {
            let path = resource.join(file);
            if path.is_file() {
                report.merge(check_file(crds, &path, expect_valid)?);
            }
        }
    }
    debug!(checked = report.checked, failures = report.failures.len(), "fixtures finished");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    use protocrd_compiler::{compile_schema, generate_crds, Config};
    use serde_json::json;

    fn crds() -> Vec<CustomResourceDefinition> {
        let (_, schemas) = compile_schema(
            "syntax = \"proto3\";\npackage demo;\nmessage WidgetSpec {\n  // +kubebuilder:validation:Maximum=10\n  int32 size = 1;\n}\n",
        )
        .unwrap();
        let config = Config::from_yaml(
            "resources:\n  - {message: demo.WidgetSpec, group: demo.io, kind: Widget, versions: [v1]}",
        )
        .unwrap();
        generate_crds(&schemas, &config).unwrap()
    }

    #[test]
    fn test_load_documents_skips_empty() {
        let docs = load_documents("a: 1\n---\n~\n---\n# second\nb: [x]\n").unwrap();
        assert_eq!(docs, vec![json!({"a": 1}), json!({"b": ["x"]})]);
    }

    #[test]
    fn test_validate_document() {
        let crds = crds();
        let ok = json!({"apiVersion": "demo.io/v1", "kind": "Widget", "metadata": {"name": "w"}, "spec": {"size": 3}});
        assert!(validate_document(&crds, &ok).unwrap().is_empty());

        let too_big = json!({"apiVersion": "demo.io/v1", "kind": "Widget", "spec": {"size": 11}});
        let violations = validate_document(&crds, &too_big).unwrap();
        assert_eq!(violations[0].to_string(), "spec.size: should be less than or equal to 10");

        let unknown = json!({"apiVersion": "demo.io/v2", "kind": "Widget"});
        assert!(matches!(validate_document(&crds, &unknown), Err(CrdError::Config(_))));
    }

    #[test]
    fn test_failure_display() {
        let failure = FixtureFailure {
            file:           PathBuf::from("widget/invalid.yaml"),
            index:          2,
            name:           Some("big".into()),
            expected_valid: false,
            violations:     vec![],
        };
        assert_eq!(failure.to_string(), "widget/invalid.yaml document 2 (big): expected invalid but it was accepted");
    }
}
