//! Named parameter records for each tool (camelCase on the wire).

use corral_core::{CorralError, CorralResult};
use serde::Deserialize;
use serde_json::Value as Json;

/// Cluster used when a call leaves it empty.
pub const DEFAULT_CLUSTER: &str = "local";

pub(crate) fn cluster_or_default(cluster: &str) -> &str {
    if cluster.is_empty() { DEFAULT_CLUSTER } else { cluster }
}

pub(crate) fn require(field: &str, value: &str) -> CorralResult<()> {
    if value.trim().is_empty() {
        return Err(CorralError::Input(format!("{} is required", field)));
    }
    Ok(())
}

/// Decode a tool's argument object; `null` is treated as `{}`.
pub(crate) fn decode<T: for<'de> Deserialize<'de>>(args: Json) -> CorralResult<T> {
    let args = if args.is_null() { Json::Object(Default::default()) } else { args };
    serde_json::from_value(args).map_err(|e| CorralError::Input(format!("invalid arguments: {}", e)))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceArgs {
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListArgs {
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub label_selector: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchArgs {
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    /// RFC 6902 operations array.
    #[serde(default)]
    pub patch: Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateArgs {
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub namespace: String,
    /// Object document, or the same document serialized as JSON/YAML text.
    #[serde(default)]
    pub resource: Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadArgs {
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterArgs {
    #[serde(default)]
    pub cluster: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagesArgs {
    #[serde(default)]
    pub clusters: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_arguments_decode_as_defaults() {
        let a: ClusterArgs = decode(Json::Null).unwrap();
        assert_eq!(cluster_or_default(&a.cluster), DEFAULT_CLUSTER);
    }

    #[test]
    fn camel_case_fields() {
        let a: ListArgs = decode(json!({"kind": "pod", "labelSelector": "app=web"})).unwrap();
        assert_eq!(a.label_selector.as_deref(), Some("app=web"));
    }

    #[test]
    fn wrong_types_are_input_errors() {
        let r: CorralResult<ResourceArgs> = decode(json!({"name": 5}));
        assert!(matches!(r, Err(CorralError::Input(_))));
    }

    #[test]
    fn require_rejects_blank() {
        assert!(require("name", "  ").is_err());
        assert!(require("name", "web").is_ok());
    }
}
