//! Corral core types: kind registry, error taxonomy, response shaping.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

pub mod kinds;
pub mod shape;

pub use kinds::{resolve, ResourceIdentity};
pub use shape::{shape, Shaped, UiContext};

/// A loosely-typed control-plane object as fetched from the API.
pub type Envelope = kube::core::DynamicObject;

/// Errors surfaced to tool callers. Messages carry the remote detail verbatim where available.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum CorralError {
    #[error("input: {0}")]
    Input(String),
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("request: {0}")]
    Request(String),
    #[error("conversion: {0}")]
    Conversion(String),
    #[error("marshal: {0}")]
    Marshal(String),
}

pub type CorralResult<T> = Result<T, CorralError>;

impl From<kube::Error> for CorralError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(ae) if ae.code == 404 => CorralError::NotFound(ae.message),
            kube::Error::Api(ae) => CorralError::Request(ae.message),
            other => CorralError::Request(other.to_string()),
        }
    }
}

/// Remove `metadata.managedFields`; no-op when absent.
pub fn strip_managed_fields(obj: &mut Envelope) {
    obj.metadata.managed_fields = None;
}

/// `namespace/name` or bare `name` for cluster-scoped objects.
pub fn obj_key(obj: &Envelope) -> String {
    let name = obj.metadata.name.as_deref().unwrap_or("");
    match obj.metadata.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => format!("{}/{}", ns, name),
        _ => name.to_string(),
    }
}

pub mod prelude {
    pub use super::{obj_key, resolve, shape, strip_managed_fields, CorralError, CorralResult, Envelope, ResourceIdentity, Shaped, UiContext};
}
