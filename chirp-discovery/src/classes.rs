use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

const DEFAULT_CLASSES: &str = include_str!("classes.json");

/// Device class to integration lookup.
///
/// File format: `{"integrations": [...], "<integration>": [classes...]}`.
/// Integrations are searched in listed order and the first hit wins.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClassTable {
    integrations: Vec<String>,
    #[serde(flatten)]
    classes: BTreeMap<String, Vec<String>>,
}

impl ClassTable {
    pub fn builtin() -> Result<Self> {
        Self::parse(DEFAULT_CLASSES).context("parse built-in device class table")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read device class table {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parse device class table {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn integration_for(&self, device_class: &str) -> Option<&str> {
        self.integrations
            .iter()
            .find(|integration| {
                self.classes
                    .get(integration.as_str())
                    .is_some_and(|classes| classes.iter().any(|c| c == device_class))
            })
            .map(String::as_str)
    }
}
