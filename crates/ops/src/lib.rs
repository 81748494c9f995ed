//! Corral ops: multi-call workflows over a `ResourceClient`.
//!
//! Each workflow is a fixed pipeline. The primary fetch is always required;
//! metrics are fetched with [`FetchPolicy::Tolerant`] because metrics-server
//! may be absent from a cluster.

#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::time::Instant;

use corral_core::{CorralError, CorralResult, Envelope};
use corral_kubehub::{selector, ResourceClient};
use k8s_openapi::api::{apps::v1::Deployment, core::v1::Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{info, warn};

pub mod access;

pub use access::{evaluate, AccessRule, BindingKind, NestedToolCall, PermissionRequest, RemediationBundle, RuleEvaluation, Verdict};

/// Kind of the synthetic envelope carrying container logs.
pub const LOGS_KIND: &str = "PodLogs";

/// Owner kinds followed from a pod, one step per entry.
const OWNER_CHAIN: [&[&str]; 2] = [&["ReplicaSet"], &["Deployment", "StatefulSet", "DaemonSet"]];

/// Whether a failed fetch aborts the workflow or is dropped from the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPolicy {
    Required,
    Tolerant,
}

/// Get one object under `policy`; a tolerated failure yields `None`.
pub async fn fetch(client: &dyn ResourceClient, kind: &str, namespace: &str, name: &str, policy: FetchPolicy) -> CorralResult<Option<Envelope>> {
    match client.get(kind, namespace, name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(e) if policy == FetchPolicy::Tolerant => {
            warn!(kind = %kind, ns = %namespace, name = %name, error = %e, "ops: optional fetch failed; omitting");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// List objects under `policy`; a tolerated failure yields an empty list.
pub async fn fetch_list(client: &dyn ResourceClient, kind: &str, namespace: &str, label_selector: Option<&str>, policy: FetchPolicy) -> CorralResult<Vec<Envelope>> {
    match client.list(kind, namespace, label_selector).await {
        Ok(items) => Ok(items),
        Err(e) if policy == FetchPolicy::Tolerant => {
            warn!(kind = %kind, ns = %namespace, error = %e, "ops: optional list failed; omitting");
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

/// Convert a loosely-typed envelope into a typed resource.
pub fn typed<K: DeserializeOwned>(obj: &Envelope) -> CorralResult<K> {
    let v = serde_json::to_value(obj).map_err(|e| CorralError::Marshal(e.to_string()))?;
    serde_json::from_value(v).map_err(|e| CorralError::Conversion(format!("{}: {}", corral_core::obj_key(obj), e)))
}

fn first_owner<'a>(obj: &'a Envelope, kinds: &[&str]) -> Option<&'a OwnerReference> {
    obj.metadata.owner_references.iter().flatten().find(|o| kinds.contains(&o.kind.as_str()))
}

/// Walk Pod -> ReplicaSet -> Deployment/StatefulSet/DaemonSet and return the top
/// owner, or `None` when the chain breaks off. Owner fetches are required.
pub async fn owning_workload(client: &dyn ResourceClient, pod: &Envelope) -> CorralResult<Option<Envelope>> {
    let ns = pod.metadata.namespace.clone().unwrap_or_default();
    let mut owner_obj: Option<Envelope> = None;
    for kinds in OWNER_CHAIN {
        let current = owner_obj.as_ref().unwrap_or(pod);
        let Some(owner) = first_owner(current, kinds).cloned() else {
            return Ok(None);
        };
        let Some(obj) = fetch(client, &owner.kind, &ns, &owner.name, FetchPolicy::Required).await? else {
            return Err(CorralError::NotFound(format!("{} {}/{}", owner.kind, ns, owner.name)));
        };
        owner_obj = Some(obj);
    }
    Ok(owner_obj)
}

/// Fetch every container's log tail and pack them into one synthetic envelope.
pub async fn container_logs(client: &dyn ResourceClient, pod: &Envelope) -> CorralResult<Envelope> {
    let typed_pod: Pod = typed(pod)?;
    let ns = pod.metadata.namespace.clone().unwrap_or_default();
    let name = pod.metadata.name.clone().unwrap_or_default();
    let mut data = serde_json::Map::new();
    for c in typed_pod.spec.map(|s| s.containers).unwrap_or_default() {
        let text = client.logs(&ns, &name, &c.name).await?;
        data.insert(c.name, serde_json::Value::String(text));
    }
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": LOGS_KIND,
        "metadata": {"name": name, "namespace": ns},
        "data": data,
    }))
    .map_err(|e| CorralError::Marshal(e.to_string()))
}

/// Pod, its top-level owner, its metrics and its container logs, in that order.
/// Absent owners and absent metrics are skipped.
pub async fn inspect_pod(client: &dyn ResourceClient, namespace: &str, name: &str) -> CorralResult<Vec<Envelope>> {
    let t0 = Instant::now();
    info!(ns = %namespace, pod = %name, "ops: inspect_pod start");
    let mut out = Vec::with_capacity(4);
    let Some(pod) = fetch(client, "Pod", namespace, name, FetchPolicy::Required).await? else {
        return Err(CorralError::NotFound(format!("pod {}/{}", namespace, name)));
    };
    let parent = owning_workload(client, &pod).await?;
    let metrics = fetch(client, "PodMetrics", namespace, name, FetchPolicy::Tolerant).await?;
    let logs = container_logs(client, &pod).await?;
    out.push(pod);
    out.extend(parent);
    out.extend(metrics);
    out.push(logs);
    info!(items = out.len(), took_ms = %t0.elapsed().as_millis(), "ops: inspect_pod ok");
    Ok(out)
}

/// The deployment followed by the pods its selector matches.
pub async fn deployment_details(client: &dyn ResourceClient, namespace: &str, name: &str) -> CorralResult<Vec<Envelope>> {
    let t0 = Instant::now();
    info!(ns = %namespace, deployment = %name, "ops: deployment_details start");
    let Some(obj) = fetch(client, "Deployment", namespace, name, FetchPolicy::Required).await? else {
        return Err(CorralError::NotFound(format!("deployment {}/{}", namespace, name)));
    };
    let deployment: Deployment = typed(&obj)?;
    let sel = match deployment.spec.as_ref() {
        Some(spec) => selector::from_label_selector(&spec.selector)?,
        None => String::new(),
    };
    if sel.is_empty() {
        return Err(CorralError::Conversion(format!("deployment {}/{} has an empty selector", namespace, name)));
    }
    let pods = fetch_list(client, "Pod", namespace, Some(&sel), FetchPolicy::Required).await?;
    info!(selector = %sel, pods = pods.len(), took_ms = %t0.elapsed().as_millis(), "ops: deployment_details ok");
    let mut out = Vec::with_capacity(pods.len() + 1);
    out.push(obj);
    out.extend(pods);
    Ok(out)
}

/// All nodes followed by all node metrics; missing metrics are tolerated.
pub async fn node_metrics(client: &dyn ResourceClient) -> CorralResult<Vec<Envelope>> {
    let t0 = Instant::now();
    let mut out = fetch_list(client, "Node", "", None, FetchPolicy::Required).await?;
    let nodes = out.len();
    out.extend(fetch_list(client, "NodeMetrics", "", None, FetchPolicy::Tolerant).await?);
    info!(nodes, metrics = out.len() - nodes, took_ms = %t0.elapsed().as_millis(), "ops: node_metrics ok");
    Ok(out)
}

/// Sorted unique container and init-container images across all namespaces.
pub async fn cluster_images(client: &dyn ResourceClient) -> CorralResult<Vec<String>> {
    let pods = fetch_list(client, "Pod", "", None, FetchPolicy::Required).await?;
    let mut images = BTreeSet::new();
    for obj in &pods {
        let pod: Pod = typed(obj)?;
        let Some(spec) = pod.spec else { continue };
        for c in spec.containers.iter().chain(spec.init_containers.iter().flatten()) {
            if let Some(img) = &c.image {
                images.insert(img.clone());
            }
        }
    }
    Ok(images.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_kubehub::MockClient;
    use serde_json::{json, Value};

    fn pod(owner: Option<(&str, &str)>) -> Value {
        let mut p = json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "web-abc-1", "namespace": "default", "labels": {"app": "web"}},
            "spec": {"containers": [{"name": "app", "image": "nginx:1.25"}, {"name": "sidecar", "image": "envoy:1.29"}]}
        });
        if let Some((kind, name)) = owner {
            p["metadata"]["ownerReferences"] = json!([{"apiVersion": "apps/v1", "kind": kind, "name": name, "uid": "u-1"}]);
        }
        p
    }

    fn replicaset() -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "ReplicaSet",
            "metadata": {"name": "web-abc", "namespace": "default",
                "ownerReferences": [{"apiVersion": "apps/v1", "kind": "Deployment", "name": "web", "uid": "u-2"}]}
        })
    }

    fn deployment() -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "default"},
            "spec": {
                "selector": {"matchLabels": {"app": "web"}},
                "template": {"metadata": {"labels": {"app": "web"}}, "spec": {"containers": [{"name": "app"}]}}
            }
        })
    }

    fn kinds(out: &[Envelope]) -> Vec<String> {
        out.iter().map(|o| o.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default()).collect()
    }

    #[tokio::test]
    async fn inspect_pod_walks_owner_chain() {
        let m = MockClient::new()
            .with_object(pod(Some(("ReplicaSet", "web-abc"))))
            .with_object(replicaset())
            .with_object(deployment())
            .with_object(json!({"apiVersion": "metrics.k8s.io/v1beta1", "kind": "PodMetrics", "metadata": {"name": "web-abc-1", "namespace": "default"}}))
            .with_logs("web-abc-1", "app", "line1\nline2\n");
        let out = inspect_pod(&m, "default", "web-abc-1").await.unwrap();
        assert_eq!(kinds(&out), ["Pod", "Deployment", "PodMetrics", LOGS_KIND]);
        let logs = &out[3];
        assert_eq!(logs.data["data"]["app"], "line1\nline2\n");
        assert_eq!(logs.data["data"]["sidecar"], "");
    }

    #[tokio::test]
    async fn inspect_pod_without_replicaset_owner_completes() {
        let m = MockClient::new().with_object(pod(None)).failing("PodMetrics");
        let out = inspect_pod(&m, "default", "web-abc-1").await.unwrap();
        assert_eq!(kinds(&out), ["Pod", LOGS_KIND]);
        assert!(!m.calls().iter().any(|c| c.starts_with("get replicaset")));
    }

    #[tokio::test]
    async fn replicaset_without_workload_owner_skips_parent() {
        let mut rs = replicaset();
        rs["metadata"]["ownerReferences"] = json!([]);
        let m = MockClient::new().with_object(pod(Some(("ReplicaSet", "web-abc")))).with_object(rs);
        let out = inspect_pod(&m, "default", "web-abc-1").await.unwrap();
        assert_eq!(kinds(&out), ["Pod", LOGS_KIND]);
    }

    #[tokio::test]
    async fn statefulset_pods_do_not_use_replicaset_step() {
        let m = MockClient::new().with_object(pod(Some(("StatefulSet", "db"))));
        let out = inspect_pod(&m, "default", "web-abc-1").await.unwrap();
        assert_eq!(kinds(&out), ["Pod", LOGS_KIND]);
    }

    #[tokio::test]
    async fn missing_pod_is_fatal() {
        let m = MockClient::new();
        let err = inspect_pod(&m, "default", "nope").await.unwrap_err();
        assert!(matches!(err, CorralError::NotFound(_)));
    }

    #[tokio::test]
    async fn missing_owner_is_fatal() {
        let m = MockClient::new().with_object(pod(Some(("ReplicaSet", "gone"))));
        let err = inspect_pod(&m, "default", "web-abc-1").await.unwrap_err();
        assert!(matches!(err, CorralError::NotFound(_)));
    }

    #[tokio::test]
    async fn dangling_workload_reference_is_fatal() {
        let m = MockClient::new().with_object(pod(Some(("ReplicaSet", "web-abc")))).with_object(replicaset());
        let err = owning_workload(&m, &m.objects_of("pod")[0]).await.unwrap_err();
        assert_eq!(err, CorralError::NotFound("deployments \"web\" not found".into()));
        assert_eq!(m.calls(), ["get replicaset default/web-abc", "get deployment default/web"]);
    }

    #[tokio::test]
    async fn deployment_details_lists_selected_pods() {
        let mut other = pod(None);
        other["metadata"]["name"] = json!("db-0");
        other["metadata"]["labels"] = json!({"app": "db"});
        let m = MockClient::new().with_object(deployment()).with_object(pod(None)).with_object(other);
        let out = deployment_details(&m, "default", "web").await.unwrap();
        assert_eq!(kinds(&out), ["Deployment", "Pod"]);
        assert_eq!(out[1].metadata.name.as_deref(), Some("web-abc-1"));
        assert!(m.calls().contains(&"list pod default app=web".to_string()));
    }

    #[tokio::test]
    async fn deployment_without_spec_is_conversion_error() {
        let m = MockClient::new().with_object(json!({"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "web", "namespace": "default"}}));
        assert!(matches!(deployment_details(&m, "default", "web").await, Err(CorralError::Conversion(_))));
    }

    #[tokio::test]
    async fn node_metrics_survives_missing_metrics_server() {
        let m = MockClient::new()
            .with_object(json!({"apiVersion": "v1", "kind": "Node", "metadata": {"name": "n1"}}))
            .with_object(json!({"apiVersion": "v1", "kind": "Node", "metadata": {"name": "n2"}}))
            .failing("NodeMetrics");
        let out = node_metrics(&m).await.unwrap();
        assert_eq!(kinds(&out), ["Node", "Node"]);
    }

    #[tokio::test]
    async fn node_metrics_appends_metrics() {
        let m = MockClient::new()
            .with_object(json!({"apiVersion": "v1", "kind": "Node", "metadata": {"name": "n1"}}))
            .with_object(json!({"apiVersion": "metrics.k8s.io/v1beta1", "kind": "NodeMetrics", "metadata": {"name": "n1"}, "usage": {"cpu": "100m"}}));
        let out = node_metrics(&m).await.unwrap();
        assert_eq!(kinds(&out), ["Node", "NodeMetrics"]);
    }

    #[tokio::test]
    async fn node_list_failure_is_fatal() {
        let m = MockClient::new().failing("Node");
        assert!(matches!(node_metrics(&m).await, Err(CorralError::Request(_))));
    }

    #[tokio::test]
    async fn cluster_images_are_unique_and_sorted() {
        let mut p2 = pod(None);
        p2["metadata"]["name"] = json!("web-abc-2");
        p2["spec"]["initContainers"] = json!([{"name": "init", "image": "busybox:1.36"}]);
        let m = MockClient::new().with_object(pod(None)).with_object(p2);
        let images = cluster_images(&m).await.unwrap();
        assert_eq!(images, ["busybox:1.36", "envoy:1.29", "nginx:1.25"]);
    }
}
