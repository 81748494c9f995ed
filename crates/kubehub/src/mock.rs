//! In-memory `ResourceClient` for tests and offline runs.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use corral_core::{resolve, CorralError, CorralResult, Envelope};
use serde_json::Value as Json;

use crate::{ensure_types, normalize_body, parse_json_patch, selector, AccessCheck, ResourceClient, Subject};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Seeded objects, log text, injected failures and denied access triples.
/// Every call is recorded so tests can assert on the I/O a workflow performed.
#[derive(Default)]
pub struct MockClient {
    objects: Mutex<Vec<Envelope>>,
    logs: Mutex<HashMap<(String, String), String>>,
    failing: Mutex<HashSet<String>>,
    denied: Mutex<HashSet<(String, String, String)>>,
    calls: Mutex<Vec<String>>,
    reviews: Mutex<Vec<(Subject, AccessCheck)>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object; panics on malformed documents since seeds are test fixtures.
    pub fn with_object(self, obj: Json) -> Self {
        let env: Envelope = serde_json::from_value(obj).expect("seed object must be a valid envelope");
        lock(&self.objects).push(env);
        self
    }

    pub fn with_logs(self, pod: &str, container: &str, text: &str) -> Self {
        lock(&self.logs).insert((pod.to_string(), container.to_string()), text.to_string());
        self
    }

    /// Make every get/list of `kind` fail as if its API were not served.
    pub fn failing(self, kind: &str) -> Self {
        lock(&self.failing).insert(resolve(kind).lower_kind);
        self
    }

    /// Deny one (verb, apiGroup, resource) triple; everything else is allowed.
    pub fn deny(self, verb: &str, group: &str, resource: &str) -> Self {
        lock(&self.denied).insert((verb.to_string(), group.to_string(), resource.to_string()));
        self
    }

    /// Recorded calls, e.g. `get pod default/web-1`.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn reviews(&self) -> Vec<(Subject, AccessCheck)> {
        lock(&self.reviews).clone()
    }

    /// Current stored objects of a kind.
    pub fn objects_of(&self, kind: &str) -> Vec<Envelope> {
        let lower = resolve(kind).lower_kind;
        lock(&self.objects).iter().filter(|o| kind_of(o) == lower).cloned().collect()
    }

    fn record(&self, call: String) {
        lock(&self.calls).push(call);
    }

    fn check_failing(&self, kind: &str) -> CorralResult<()> {
        if lock(&self.failing).contains(&resolve(kind).lower_kind) {
            return Err(CorralError::Request(format!("the server could not find the requested resource ({})", resolve(kind).resource)));
        }
        Ok(())
    }
}

fn kind_of(obj: &Envelope) -> String {
    obj.types.as_ref().map(|t| t.kind.to_ascii_lowercase()).unwrap_or_default()
}

fn in_namespace(obj: &Envelope, namespace: &str) -> bool {
    namespace.is_empty() || obj.metadata.namespace.as_deref() == Some(namespace)
}

fn not_found(kind: &str, name: &str) -> CorralError {
    CorralError::NotFound(format!("{} \"{}\" not found", resolve(kind).resource, name))
}

#[async_trait::async_trait]
impl ResourceClient for MockClient {
    async fn get(&self, kind: &str, namespace: &str, name: &str) -> CorralResult<Envelope> {
        self.record(format!("get {} {}/{}", resolve(kind).lower_kind, namespace, name));
        self.check_failing(kind)?;
        let lower = resolve(kind).lower_kind;
        lock(&self.objects)
            .iter()
            .find(|o| kind_of(o) == lower && in_namespace(o, namespace) && o.metadata.name.as_deref() == Some(name))
            .cloned()
            .ok_or_else(|| not_found(kind, name))
    }

    async fn list(&self, kind: &str, namespace: &str, label_selector: Option<&str>) -> CorralResult<Vec<Envelope>> {
        let sel = selector::parse(label_selector.unwrap_or(""))?;
        self.record(format!("list {} {} {}", resolve(kind).lower_kind, namespace, sel));
        self.check_failing(kind)?;
        let lower = resolve(kind).lower_kind;
        Ok(lock(&self.objects)
            .iter()
            .filter(|o| kind_of(o) == lower && in_namespace(o, namespace))
            .filter(|o| sel.matches(&o.metadata.labels.clone().unwrap_or_default()))
            .cloned()
            .collect())
    }

    async fn patch(&self, kind: &str, namespace: &str, name: &str, ops: &Json) -> CorralResult<Envelope> {
        let p = parse_json_patch(ops)?;
        self.record(format!("patch {} {}/{}", resolve(kind).lower_kind, namespace, name));
        let lower = resolve(kind).lower_kind;
        let mut objects = lock(&self.objects);
        let slot = objects
            .iter_mut()
            .find(|o| kind_of(o) == lower && in_namespace(o, namespace) && o.metadata.name.as_deref() == Some(name))
            .ok_or_else(|| not_found(kind, name))?;
        let mut doc = serde_json::to_value(&*slot).map_err(|e| CorralError::Marshal(e.to_string()))?;
        json_patch::patch(&mut doc, &p).map_err(|e| CorralError::Request(e.to_string()))?;
        let updated: Envelope = serde_json::from_value(doc).map_err(|e| CorralError::Request(e.to_string()))?;
        *slot = updated.clone();
        Ok(updated)
    }

    async fn create(&self, kind: &str, namespace: &str, body: &Json) -> CorralResult<Envelope> {
        let mut obj = normalize_body(body)?;
        ensure_types(&mut obj, kind);
        if !namespace.is_empty() {
            obj.metadata.namespace = Some(namespace.to_string());
        }
        let name = obj.metadata.name.clone().unwrap_or_default();
        self.record(format!("create {} {}/{}", resolve(kind).lower_kind, obj.metadata.namespace.as_deref().unwrap_or(""), name));
        let ns = obj.metadata.namespace.clone().unwrap_or_default();
        let lower = resolve(kind).lower_kind;
        let mut objects = lock(&self.objects);
        if objects.iter().any(|o| kind_of(o) == lower && in_namespace(o, &ns) && o.metadata.name.as_deref() == Some(name.as_str())) {
            return Err(CorralError::Request(format!("{} \"{}\" already exists", resolve(kind).resource, name)));
        }
        objects.push(obj.clone());
        Ok(obj)
    }

    async fn logs(&self, namespace: &str, pod: &str, container: &str) -> CorralResult<String> {
        self.record(format!("logs {}/{} {}", namespace, pod, container));
        Ok(lock(&self.logs).get(&(pod.to_string(), container.to_string())).cloned().unwrap_or_default())
    }

    async fn access_review(&self, subject: &Subject, check: &AccessCheck) -> CorralResult<bool> {
        lock(&self.reviews).push((subject.clone(), check.clone()));
        let key = (check.verb.clone(), check.group.clone(), check.resource.clone());
        Ok(!lock(&self.denied).contains(&key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded() -> MockClient {
        MockClient::new()
            .with_object(json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "a", "namespace": "default", "labels": {"app": "web"}}}))
            .with_object(json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "b", "namespace": "default", "labels": {"app": "db"}}}))
            .with_object(json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "c", "namespace": "other", "labels": {"app": "web"}}}))
    }

    #[tokio::test]
    async fn list_filters_by_namespace_and_selector() {
        let m = seeded();
        assert_eq!(m.list("pod", "", None).await.unwrap().len(), 3);
        assert_eq!(m.list("Pod", "default", None).await.unwrap().len(), 2);
        let web = m.list("pod", "", Some("app=web")).await.unwrap();
        assert_eq!(web.len(), 2);
    }

    #[tokio::test]
    async fn bad_selector_fails_before_any_call() {
        let m = seeded();
        let err = m.list("pod", "default", Some("app in (web")).await.unwrap_err();
        assert!(matches!(err, CorralError::Input(_)));
        assert!(m.calls().is_empty());
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let m = seeded();
        let err = m.get("pod", "default", "zzz").await.unwrap_err();
        assert_eq!(err, CorralError::NotFound("pods \"zzz\" not found".into()));
    }

    #[tokio::test]
    async fn patch_applies_operations() {
        let m = seeded();
        let out = m
            .patch("pod", "default", "a", &json!([{"op": "add", "path": "/metadata/labels/tier", "value": "fe"}]))
            .await
            .unwrap();
        assert_eq!(out.metadata.labels.unwrap().get("tier").map(String::as_str), Some("fe"));
        let err = m
            .patch("pod", "default", "a", &json!([{"op": "remove", "path": "/spec/missing"}]))
            .await
            .unwrap_err();
        assert!(matches!(err, CorralError::Request(_)));
    }

    #[tokio::test]
    async fn create_rejects_duplicates() {
        let m = seeded();
        let body = json!({"metadata": {"name": "cm"}, "data": {"k": "v"}});
        let created = m.create("configmap", "default", &body).await.unwrap();
        assert_eq!(created.types.unwrap().kind, "ConfigMap");
        assert!(matches!(m.create("configmap", "default", &body).await, Err(CorralError::Request(_))));
    }

    #[tokio::test]
    async fn failing_kind_errors() {
        let m = seeded().failing("nodemetrics");
        assert!(matches!(m.list("NodeMetrics", "", None).await, Err(CorralError::Request(_))));
    }
}
