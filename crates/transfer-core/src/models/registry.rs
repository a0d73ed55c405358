//! Registered model and model version entities.

use super::run::KeyValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Workspace-registry lifecycle stage of a model version. Unity-Catalog
/// registries do not support stages (aliases only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    None,
    Staging,
    Production,
    Archived,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::None => "None",
            Stage::Staging => "Staging",
            Stage::Production => "Production",
            Stage::Archived => "Archived",
        }
    }

    /// Case-insensitive parse; unknown strings are rejected.
    pub fn parse(s: &str) -> Option<Stage> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Some(Stage::None),
            "staging" => Some(Stage::Staging),
            "production" => Some(Stage::Production),
            "archived" => Some(Stage::Archived),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A specific (model name, version number) pair bound to one run and one
/// artifact subtree of that run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelVersion {
    pub name: String,
    pub version: String,
    pub run_id: String,
    /// Artifact URI pointing inside the backing run's artifact tree.
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<KeyValue>,
    /// Aliases on the parent model pointing at this version. Collected
    /// from the model's alias map at export time.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated_timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// A named, versioned handle in the model registry. On Unity-Catalog
/// backends the name is a three-part dotted path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredModel {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<KeyValue>,
    /// alias -> version number. BTreeMap keeps envelope output stable.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aliases: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated_timestamp: Option<i64>,
    /// Permission ACLs, stored verbatim when the collaborator provides them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<serde_json::Value>,
}

impl RegisteredModel {
    /// Aliases pointing at the given version number.
    pub fn aliases_for_version(&self, version: &str) -> Vec<String> {
        self.aliases
            .iter()
            .filter(|(_, v)| v.as_str() == version)
            .map(|(alias, _)| alias.clone())
            .collect()
    }

    /// True when the name is a three-part Unity-Catalog path.
    pub fn is_unity_catalog_name(&self) -> bool {
        self.name.split('.').count() == 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_parse() {
        assert_eq!(Stage::parse("PRODUCTION"), Some(Stage::Production));
        assert_eq!(Stage::parse("staging"), Some(Stage::Staging));
        assert_eq!(Stage::parse("nonsense"), None);
    }

    #[test]
    fn test_aliases_for_version() {
        let mut aliases = BTreeMap::new();
        aliases.insert("champion".to_string(), "3".to_string());
        aliases.insert("challenger".to_string(), "4".to_string());
        aliases.insert("prod".to_string(), "3".to_string());
        let model = RegisteredModel {
            name: "m".into(),
            description: None,
            tags: vec![],
            aliases,
            creation_timestamp: None,
            last_updated_timestamp: None,
            permissions: None,
        };
        let mut found = model.aliases_for_version("3");
        found.sort();
        assert_eq!(found, vec!["champion".to_string(), "prod".to_string()]);
    }

    #[test]
    fn test_uc_name_detection() {
        let model = RegisteredModel {
            name: "cat.sch.m".into(),
            description: None,
            tags: vec![],
            aliases: BTreeMap::new(),
            creation_timestamp: None,
            last_updated_timestamp: None,
            permissions: None,
        };
        assert!(model.is_unity_catalog_name());
    }
}
