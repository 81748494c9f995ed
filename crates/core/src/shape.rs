//! Response shaping: compact model payload plus UI link context.

use serde::{Deserialize, Serialize};

use crate::{kinds, strip_managed_fields, CorralError, CorralResult, Envelope};

/// Model payload used in place of an empty array.
pub const NO_RESOURCES: &str = "no resources found";

/// Descriptor the UI uses to build a deep link to one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiContext {
    pub namespace: String,
    pub kind: String,
    pub cluster: String,
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

impl UiContext {
    pub fn for_object(obj: &Envelope, cluster: &str) -> Self {
        let kind = obj.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default();
        Self {
            namespace: obj.metadata.namespace.clone().unwrap_or_default(),
            type_name: kinds::resolve(&kind).type_name(),
            kind,
            cluster: cluster.to_string(),
            name: obj.metadata.name.clone().unwrap_or_default(),
        }
    }
}

/// Dual-channel tool payload: `{"llm": ..., "uiContext": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shaped {
    pub llm: serde_json::Value,
    #[serde(rename = "uiContext", default, skip_serializing_if = "Vec::is_empty")]
    pub ui_context: Vec<UiContext>,
}

impl Shaped {
    pub fn to_json(&self) -> CorralResult<String> {
        serde_json::to_string(self).map_err(|e| CorralError::Marshal(e.to_string()))
    }
}

/// Strip managed fields from every envelope and build the dual-channel payload.
pub fn shape(envelopes: Vec<Envelope>, cluster: &str) -> CorralResult<Shaped> {
    if envelopes.is_empty() {
        return Ok(Shaped { llm: serde_json::Value::String(NO_RESOURCES.to_string()), ui_context: Vec::new() });
    }
    let mut ui_context = Vec::with_capacity(envelopes.len());
    let mut items = Vec::with_capacity(envelopes.len());
    for mut obj in envelopes {
        strip_managed_fields(&mut obj);
        ui_context.push(UiContext::for_object(&obj, cluster));
        items.push(serde_json::to_value(&obj).map_err(|e| CorralError::Marshal(e.to_string()))?);
    }
    Ok(Shaped { llm: serde_json::Value::Array(items), ui_context })
}
