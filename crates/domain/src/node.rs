//! Node definitions as read from the nodes file.

use serde::{Deserialize, Serialize};

/// The configured attributes of one monitored host.
///
/// Replaced wholesale on every reload; never patched field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    pub name: String,
    pub location: String,
    pub region: String,
    pub enabled: bool,
}

/// One raw element of the nodes file.
///
/// Every field is optional at parse time so a single incomplete entry does
/// not invalidate the whole file; [`NodeEntry::to_config`] decides whether
/// the entry is usable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default, alias = "enable")]
    pub enabled: Option<bool>,
}

impl NodeEntry {
    /// Convert to a [`NodeConfig`], or return the name of the first missing
    /// required field. An empty `id` counts as missing.
    pub fn to_config(&self) -> Result<NodeConfig, &'static str> {
        let id = match self.id.as_deref() {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => return Err("id"),
        };
        Ok(NodeConfig {
            id,
            name: self.name.clone().ok_or("name")?,
            location: self.location.clone().ok_or("location")?,
            region: self.region.clone().ok_or("region")?,
            enabled: self.enabled.ok_or("enabled")?,
        })
    }

    /// The entry's id if present, for lookups that tolerate incomplete entries.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref().map(str::trim)
    }
}

impl From<NodeConfig> for NodeEntry {
    fn from(cfg: NodeConfig) -> Self {
        Self {
            id: Some(cfg.id),
            name: Some(cfg.name),
            location: Some(cfg.location),
            region: Some(cfg.region),
            enabled: Some(cfg.enabled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_entry_converts() {
        let entry: NodeEntry = serde_json::from_str(
            r#"{"id":"n1","name":"Tokyo","location":"JP","region":"ap","enable":true}"#,
        )
        .unwrap();
        let cfg = entry.to_config().unwrap();
        assert_eq!(cfg.id, "n1");
        assert_eq!(cfg.name, "Tokyo");
        assert!(cfg.enabled);
    }

    #[test]
    fn missing_field_is_reported_by_name() {
        let entry: NodeEntry =
            serde_json::from_str(r#"{"id":"n1","name":"a","location":"b","region":"c"}"#).unwrap();
        assert_eq!(entry.to_config(), Err("enabled"));

        let entry: NodeEntry = serde_json::from_str(r#"{"name":"a"}"#).unwrap();
        assert_eq!(entry.to_config(), Err("id"));
    }

    #[test]
    fn blank_id_is_missing() {
        let entry = NodeEntry {
            id: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(entry.to_config(), Err("id"));
    }
}
