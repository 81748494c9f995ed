#![forbid(unsafe_code)]

use std::io;
use std::sync::{Arc, Mutex};

use corral_api::{ToolOutput, Tools};
use corral_core::CorralError;
use corral_kubehub::{Connector, Credentials, MockClient, ResourceClient};
use serde_json::{json, Value};

/// Hands out the same mock for every cluster and remembers which clusters were addressed.
struct MockConnector {
    client: Arc<MockClient>,
    clusters: Mutex<Vec<String>>,
}

impl Connector for MockConnector {
    fn connect(&self, _creds: &Credentials, cluster: &str) -> Arc<dyn ResourceClient> {
        self.clusters.lock().unwrap().push(cluster.to_string());
        self.client.clone()
    }
}

fn setup(m: MockClient) -> (Tools, Arc<MockConnector>) {
    let conn = Arc::new(MockConnector { client: Arc::new(m), clusters: Mutex::new(Vec::new()) });
    (Tools::new(conn.clone()), conn)
}

fn creds() -> Credentials {
    Credentials::new("token-xyz", "https://rancher.example.com")
}

fn test_pod() -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": "test-pod",
            "namespace": "default",
            "labels": {"app": "web"},
            "managedFields": [{"manager": "kubectl", "operation": "Apply"}]
        },
        "spec": {"containers": [{"name": "app", "image": "nginx:1.25"}]}
    })
}

fn payload(out: ToolOutput) -> Value {
    match out {
        ToolOutput::Payload(s) => serde_json::from_str(&s.to_json().unwrap()).unwrap(),
        other => panic!("expected payload, got {other:?}"),
    }
}

#[tokio::test]
async fn get_pod_returns_llm_and_ui_context() {
    let (tools, _) = setup(MockClient::new().with_object(test_pod()));
    let out = tools
        .call("get_kubernetes_resource", json!({"cluster": "c-1", "kind": "pod", "namespace": "default", "name": "test-pod"}), &creds())
        .await
        .unwrap();
    let v = payload(out);
    assert_eq!(v["llm"][0]["metadata"]["name"], "test-pod");
    assert!(v["llm"][0]["metadata"].get("managedFields").is_none());
    assert_eq!(
        v["uiContext"],
        json!([{"namespace": "default", "kind": "Pod", "cluster": "c-1", "name": "test-pod", "type": "pod"}])
    );
}

#[tokio::test]
async fn empty_cluster_defaults_to_local() {
    let (tools, conn) = setup(MockClient::new().with_object(test_pod()));
    let v = payload(
        tools
            .call("get_kubernetes_resource", json!({"kind": "Pod", "namespace": "default", "name": "test-pod"}), &creds())
            .await
            .unwrap(),
    );
    assert_eq!(v["uiContext"][0]["cluster"], "local");
    assert_eq!(conn.clusters.lock().unwrap().as_slice(), ["local"]);
}

#[tokio::test]
async fn missing_name_is_input_error() {
    let (tools, conn) = setup(MockClient::new());
    let err = tools.call("get_kubernetes_resource", json!({"kind": "pod", "namespace": "default"}), &creds()).await.unwrap_err();
    assert!(matches!(err, CorralError::Input(_)));
    assert!(conn.client.calls().is_empty());
}

#[tokio::test]
async fn unknown_tool_is_rejected() {
    let (tools, _) = setup(MockClient::new());
    let err = tools.call("delete_everything", json!({}), &creds()).await.unwrap_err();
    assert_eq!(err, CorralError::Input("unknown tool: delete_everything".into()));
}

#[tokio::test]
async fn list_with_selector_and_empty_result() {
    let (tools, _) = setup(MockClient::new().with_object(test_pod()));
    let v = payload(
        tools
            .call("list_kubernetes_resources", json!({"kind": "pod", "namespace": "default", "labelSelector": "app in (web,api)"}), &creds())
            .await
            .unwrap(),
    );
    assert_eq!(v["llm"].as_array().unwrap().len(), 1);

    let v = payload(tools.call("list_kubernetes_resources", json!({"kind": "pod", "namespace": "other"}), &creds()).await.unwrap());
    assert_eq!(v["llm"], corral_core::shape::NO_RESOURCES);
    assert!(v.get("uiContext").is_none());
}

#[tokio::test]
async fn bad_selector_is_input_error() {
    let (tools, conn) = setup(MockClient::new().with_object(test_pod()));
    let err = tools
        .call("list_kubernetes_resources", json!({"kind": "pod", "labelSelector": "app in (web"}), &creds())
        .await
        .unwrap_err();
    assert!(matches!(err, CorralError::Input(_)));
    assert!(conn.client.calls().is_empty());
}

#[tokio::test]
async fn patch_applies_operations() {
    let (tools, conn) = setup(MockClient::new().with_object(test_pod()));
    let v = payload(
        tools
            .call(
                "patch_kubernetes_resource",
                json!({"kind": "pod", "namespace": "default", "name": "test-pod",
                       "patch": [{"op": "replace", "path": "/metadata/labels/app", "value": "api"}]}),
                &creds(),
            )
            .await
            .unwrap(),
    );
    assert_eq!(v["llm"][0]["metadata"]["labels"]["app"], "api");
    assert_eq!(conn.client.objects_of("pod")[0].metadata.labels.as_ref().unwrap()["app"], "api");
}

#[tokio::test]
async fn patch_requires_an_operations_array() {
    let (tools, _) = setup(MockClient::new().with_object(test_pod()));
    let err = tools
        .call("patch_kubernetes_resource", json!({"kind": "pod", "namespace": "default", "name": "test-pod", "patch": {"op": "add"}}), &creds())
        .await
        .unwrap_err();
    assert!(matches!(err, CorralError::Input(_)));
}

#[tokio::test]
async fn create_accepts_yaml_text() {
    let (tools, conn) = setup(MockClient::new());
    let body = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: settings\ndata:\n  mode: fast\n";
    let v = payload(
        tools
            .call("create_kubernetes_resource", json!({"kind": "ConfigMap", "namespace": "default", "resource": body}), &creds())
            .await
            .unwrap(),
    );
    assert_eq!(v["uiContext"][0]["name"], "settings");
    assert_eq!(v["uiContext"][0]["namespace"], "default");
    assert_eq!(conn.client.objects_of("configmap").len(), 1);
}

#[tokio::test]
async fn create_without_resource_is_input_error() {
    let (tools, _) = setup(MockClient::new());
    let err = tools.call("create_kubernetes_resource", json!({"kind": "ConfigMap"}), &creds()).await.unwrap_err();
    assert!(matches!(err, CorralError::Input(_)));
}

#[tokio::test]
async fn inspect_pod_includes_logs_envelope() {
    let m = MockClient::new().with_object(test_pod()).with_logs("test-pod", "app", "ready\n").failing("PodMetrics");
    let (tools, _) = setup(m);
    let v = payload(tools.call("inspect_pod", json!({"namespace": "default", "name": "test-pod"}), &creds()).await.unwrap());
    let kinds: Vec<&str> = v["uiContext"].as_array().unwrap().iter().map(|u| u["kind"].as_str().unwrap()).collect();
    assert_eq!(kinds, ["Pod", "PodLogs"]);
    assert_eq!(v["llm"][1]["data"]["app"], "ready\n");
}

#[tokio::test]
async fn node_metrics_without_metrics_server() {
    let m = MockClient::new().with_object(json!({"apiVersion": "v1", "kind": "Node", "metadata": {"name": "n1"}})).failing("NodeMetrics");
    let (tools, _) = setup(m);
    let v = payload(tools.call("get_node_metrics", json!({"cluster": "c-1"}), &creds()).await.unwrap());
    assert_eq!(v["uiContext"], json!([{"namespace": "", "kind": "Node", "cluster": "c-1", "name": "n1", "type": "node"}]));
}

#[tokio::test]
async fn cluster_images_keyed_by_cluster() {
    let (tools, conn) = setup(MockClient::new().with_object(test_pod()));
    let v = payload(tools.call("get_cluster_images", json!({"clusters": ["c-1", "c-2"]}), &creds()).await.unwrap());
    assert_eq!(v["llm"], json!({"c-1": ["nginx:1.25"], "c-2": ["nginx:1.25"]}));
    assert_eq!(conn.clusters.lock().unwrap().as_slice(), ["c-1", "c-2"]);
}

#[tokio::test]
async fn permissions_already_granted() {
    let (tools, conn) = setup(MockClient::new());
    let out = tools
        .call(
            "update_user_permissions",
            json!({"cluster": "c-1", "namespace": "default", "user": "u-alice", "rules": [{"verbs": ["get"], "resources": ["pods"], "apiGroups": [""]}]}),
            &creds(),
        )
        .await
        .unwrap();
    let ToolOutput::Text(msg) = out else { panic!("expected text") };
    assert!(msg.contains("u-alice"));
    assert_eq!(conn.client.reviews().len(), 1);
}

#[tokio::test]
async fn denied_permissions_need_confirmation() {
    let (tools, _) = setup(MockClient::new().deny("delete", "apps", "deployments"));
    let out = tools
        .call(
            "update_user_permissions",
            json!({"cluster": "c-1", "project": "p-1", "group": "local://ops",
                   "rules": [{"verbs": ["get", "delete"], "resources": ["deployments"], "apiGroups": ["apps"]}]}),
            &creds(),
        )
        .await
        .unwrap();
    let ToolOutput::Confirmation(c) = &out else { panic!("expected confirmation") };
    assert_eq!(c.llm, c.confirmation.message);
    assert_eq!(c.confirmation.tool_calls.len(), 2);
    assert_eq!(c.confirmation.tool_calls[1].arguments["kind"], "ProjectRoleTemplateBinding");
    assert_eq!(c.confirmation.tool_calls[1].arguments["resource"]["projectName"], "c-1:p-1");

    let wire: Value = serde_json::from_str(&out.render().unwrap()).unwrap();
    assert_eq!(wire["confirmation"]["toolCalls"][0]["name"], "create_kubernetes_resource");
    assert_eq!(wire["confirmation"]["toolCalls"][0]["arguments"]["cluster"], "local");
}

#[tokio::test]
async fn permissions_need_exactly_one_subject() {
    let (tools, _) = setup(MockClient::new());
    let err = tools.call("update_user_permissions", json!({"cluster": "c-1", "rules": []}), &creds()).await.unwrap_err();
    assert!(matches!(err, CorralError::Input(_)));
}

/// Shared buffer the fmt subscriber writes into.
#[derive(Clone, Default)]
struct LogBuf(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LogBuf {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

#[tokio::test]
async fn undecodable_arguments_reach_the_error_path() {
    let logs = LogBuf::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt().with_ansi(false).with_writer(move || writer.clone()).finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let (tools, conn) = setup(MockClient::new().with_object(test_pod()));
    let err = tools.call("get_kubernetes_resource", json!({"kind": "pod", "name": 5}), &creds()).await.unwrap_err();
    assert!(matches!(err, CorralError::Input(_)));
    assert!(conn.client.calls().is_empty());

    let text = logs.text();
    assert!(text.contains("api: tool call start"), "{text}");
    assert!(text.contains("api: tool call failed"), "{text}");
    assert!(text.contains("invalid arguments"), "{text}");
}
