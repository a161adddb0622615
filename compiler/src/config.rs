use std::{collections::BTreeMap, fs, path::Path};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{error::CrdError, utils::quote};

/// Contents of a `protocrd.yaml` file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub resources: Vec<Resource>,
}

/// One custom resource backed by a proto message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Resource {
    /// Fully-qualified message used as the resource `spec`.
    pub message:         String,
    pub group:           String,
    pub kind:            String,
    pub versions:        Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plural:          Option<String>,
    #[serde(default)]
    pub scope:           ResourceScope,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub short_names:     Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories:      Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels:          BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations:     BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceScope {
    #[default]
    Namespaced,
    Cluster,
}

impl ResourceScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceScope::Namespaced => "Namespaced",
            ResourceScope::Cluster => "Cluster",
        }
    }
}

impl Resource {
    /// Configured plural, or the lowercased kind with an `s` appended.
    pub fn plural(&self) -> String {
        self.plural
            .clone()
            .unwrap_or_else(|| format!("{}s", self.kind.to_lowercase()))
    }

    /// Configured storage version, or the first listed version.
    pub fn storage_version(&self) -> Option<&str> {
        self.storage_version
            .as_deref()
            .or_else(|| self.versions.first().map(String::as_str))
    }

    /// `<plural>.<group>`, the CRD object name.
    pub fn crd_name(&self) -> String {
        format!("{}.{}", self.plural(), self.group)
    }
}

impl Config {
    /// Parses and validates a configuration document.
    pub fn from_yaml(text: &str) -> Result<Config, CrdError> {
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Config, CrdError> {
        debug!(path = %path.display(), "loading configuration");
        let text = fs::read_to_string(path)?;
        Config::from_yaml(&text)
    }

    /// Returns `Err(CrdError::Config(_))` on the first invalid resource.
    pub fn validate(&self) -> Result<(), CrdError> {
        if self.resources.is_empty() {
            return Err(CrdError::Config("at least one resource is required".to_string()));
        }
        let mut names = BTreeMap::new();
        for (i, res) in self.resources.iter().enumerate() {
            let invalid = |msg: String| CrdError::Config(format!("resources[{}]: {}", i, msg));
            if res.message.trim().is_empty() {
                return Err(invalid("message must not be empty".to_string()));
            }
            if res.group.trim().is_empty() {
                return Err(invalid("group must not be empty".to_string()));
            }
            if res.kind.trim().is_empty() {
                return Err(invalid("kind must not be empty".to_string()));
            }
            if res.versions.is_empty() {
                return Err(invalid("at least one version is required".to_string()));
            }
            for (j, version) in res.versions.iter().enumerate() {
                if res.versions[..j].contains(version) {
                    return Err(invalid(format!("version {} is listed twice", quote(version))));
                }
            }
            if let Some(storage) = &res.storage_version {
                if !res.versions.contains(storage) {
                    return Err(invalid(format!(
                        "storage version {} is not one of the versions {:?}",
                        quote(storage),
                        res.versions
                    )));
                }
            }
            if let Some(previous) = names.insert(res.crd_name(), i) {
                return Err(invalid(format!(
                    "{} is also defined by resources[{}]",
                    quote(&res.crd_name()),
                    previous
                )));
            }
        }
        Ok(())
    }
}
