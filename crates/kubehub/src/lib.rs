//! Corral kubehub: per-request authenticated access to a cluster behind the
//! management endpoint (`{url}/k8s/clusters/{cluster}`).

#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use corral_core::{resolve, CorralError, CorralResult, Envelope};
use futures::{AsyncBufReadExt, TryStreamExt};
use kube::{
    api::{Api, ListParams, LogParams, Patch, PatchParams, PostParams},
    core::TypeMeta,
    Client, Config,
};
use serde_json::Value as Json;
use tracing::{debug, info};

pub mod mock;
pub mod selector;

pub use mock::MockClient;

/// Hard cap on log lines fetched per container.
pub const LOG_TAIL_LINES: i64 = 50;

/// Bearer token plus base management URL, carried per request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    pub url: String,
}

impl Credentials {
    pub fn new(token: impl Into<String>, url: impl Into<String>) -> Self {
        Self { token: token.into(), url: url.into() }
    }

    /// API root for one downstream cluster.
    pub fn cluster_url(&self, cluster: &str) -> String {
        format!("{}/k8s/clusters/{}", self.url.trim_end_matches('/'), cluster)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").field("token", &"<redacted>").field("url", &self.url).finish()
    }
}

/// Whom an access review is evaluated for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    User(String),
    Group(String),
}

impl Subject {
    pub fn name(&self) -> &str {
        match self {
            Subject::User(n) | Subject::Group(n) => n,
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::User(n) => write!(f, "user {}", n),
            Subject::Group(n) => write!(f, "group {}", n),
        }
    }
}

/// One authorization question; empty strings mean unspecified.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessCheck {
    pub namespace: String,
    pub verb: String,
    pub group: String,
    pub resource: String,
}

/// Resource I/O against one cluster. Kinds are resolved through the kind registry;
/// an empty namespace addresses cluster-scoped objects or all namespaces.
#[async_trait::async_trait]
pub trait ResourceClient: Send + Sync {
    async fn get(&self, kind: &str, namespace: &str, name: &str) -> CorralResult<Envelope>;

    /// `label_selector` is validated before any request is made.
    async fn list(&self, kind: &str, namespace: &str, label_selector: Option<&str>) -> CorralResult<Vec<Envelope>>;

    /// Apply an RFC 6902 operations array. See [`parse_json_patch`] for which
    /// failures are local and which come from the server.
    async fn patch(&self, kind: &str, namespace: &str, name: &str, ops: &Json) -> CorralResult<Envelope>;

    /// `body` is either a JSON/YAML string or a structured document.
    async fn create(&self, kind: &str, namespace: &str, body: &Json) -> CorralResult<Envelope>;

    /// Last [`LOG_TAIL_LINES`] lines of one container.
    async fn logs(&self, namespace: &str, pod: &str, container: &str) -> CorralResult<String>;

    async fn access_review(&self, subject: &Subject, check: &AccessCheck) -> CorralResult<bool>;
}

/// Builds a client bound to (credentials, cluster).
pub trait Connector: Send + Sync {
    fn connect(&self, creds: &Credentials, cluster: &str) -> Arc<dyn ResourceClient>;
}

/// Default connector producing kube-backed clients.
#[derive(Debug, Default, Clone, Copy)]
pub struct KubeConnector;

impl Connector for KubeConnector {
    fn connect(&self, creds: &Credentials, cluster: &str) -> Arc<dyn ResourceClient> {
        Arc::new(KubeClient::new(creds.clone(), cluster))
    }
}

fn insecure_tls() -> bool {
    std::env::var("CORRAL_INSECURE_TLS")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Normalise a create body (string or document) into one object.
pub fn normalize_body(body: &Json) -> CorralResult<Envelope> {
    let doc = match body {
        Json::String(s) => serde_yaml::from_str::<Json>(s).map_err(|e| CorralError::Input(format!("resource is not valid JSON/YAML: {}", e)))?,
        Json::Object(_) => body.clone(),
        other => return Err(CorralError::Input(format!("resource must be an object or a string, got {}", type_name(other)))),
    };
    if !doc.is_object() {
        return Err(CorralError::Input("resource must decode to an object".into()));
    }
    serde_json::from_value(doc).map_err(|e| CorralError::Conversion(format!("resource is not a valid object: {}", e)))
}

/// Fill `apiVersion`/`kind` from the registry when the body omits them.
pub fn ensure_types(obj: &mut Envelope, kind: &str) {
    if obj.types.is_none() {
        let id = resolve(kind);
        obj.types = Some(TypeMeta { api_version: id.api_version(), kind: id.kind });
    }
}

/// Parse an operations array as a JSON Patch document.
///
/// Operations that are not valid RFC 6902 (unknown `op`, missing `path`) fail
/// here as `Input` with the decoder's message and are never sent. Well-formed
/// operations the server rejects (missing target path, immutable field) come
/// back as `Request` carrying the server's message.
pub fn parse_json_patch(ops: &Json) -> CorralResult<json_patch::Patch> {
    if !ops.is_array() {
        return Err(CorralError::Input("patch must be a JSON Patch operations array".into()));
    }
    serde_json::from_value(ops.clone()).map_err(|e| CorralError::Input(format!("invalid JSON patch: {}", e)))
}

fn type_name(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() { None } else { Some(s.to_string()) }
}

/// kube-rs backed client. A fresh authenticated `Client` is built for every call.
#[derive(Debug, Clone)]
pub struct KubeClient {
    creds: Credentials,
    cluster: String,
}

impl KubeClient {
    pub fn new(creds: Credentials, cluster: &str) -> Self {
        Self { creds, cluster: cluster.to_string() }
    }

    fn client(&self) -> CorralResult<Client> {
        let url = self.creds.cluster_url(&self.cluster);
        let mut config = Config::new(url.parse().map_err(|e| CorralError::Input(format!("invalid cluster url {}: {}", url, e)))?);
        config.auth_info.token = Some(secrecy::SecretString::new(self.creds.token.clone()));
        config.accept_invalid_certs = insecure_tls();
        Ok(Client::try_from(config)?)
    }

    fn api(&self, client: Client, kind: &str, namespace: &str) -> Api<Envelope> {
        let ar = resolve(kind).api_resource();
        if namespace.is_empty() {
            Api::all_with(client, &ar)
        } else {
            Api::namespaced_with(client, namespace, &ar)
        }
    }
}

#[async_trait::async_trait]
impl ResourceClient for KubeClient {
    async fn get(&self, kind: &str, namespace: &str, name: &str) -> CorralResult<Envelope> {
        let t0 = Instant::now();
        let api = self.api(self.client()?, kind, namespace);
        let obj = api.get(name).await?;
        debug!(cluster = %self.cluster, kind = %kind, ns = %namespace, name = %name, took_ms = %t0.elapsed().as_millis(), "kubehub: get ok");
        Ok(obj)
    }

    async fn list(&self, kind: &str, namespace: &str, label_selector: Option<&str>) -> CorralResult<Vec<Envelope>> {
        let mut lp = ListParams::default();
        if let Some(sel) = label_selector {
            let parsed = selector::parse(sel)?;
            if !parsed.is_empty() {
                lp = lp.labels(sel.trim());
            }
        }
        let t0 = Instant::now();
        let api = self.api(self.client()?, kind, namespace);
        let list = api.list(&lp).await?;
        debug!(cluster = %self.cluster, kind = %kind, ns = %namespace, count = list.items.len(), took_ms = %t0.elapsed().as_millis(), "kubehub: list ok");
        Ok(list.items)
    }

    async fn patch(&self, kind: &str, namespace: &str, name: &str, ops: &Json) -> CorralResult<Envelope> {
        let patch = parse_json_patch(ops)?;
        let api = self.api(self.client()?, kind, namespace);
        let obj = api.patch(name, &PatchParams::default(), &Patch::Json::<()>(patch)).await?;
        info!(cluster = %self.cluster, kind = %kind, ns = %namespace, name = %name, "kubehub: patch applied");
        Ok(obj)
    }

    async fn create(&self, kind: &str, namespace: &str, body: &Json) -> CorralResult<Envelope> {
        let mut obj = normalize_body(body)?;
        ensure_types(&mut obj, kind);
        let ns = if namespace.is_empty() { obj.metadata.namespace.clone().unwrap_or_default() } else { namespace.to_string() };
        let api = self.api(self.client()?, kind, &ns);
        let created = api.create(&PostParams::default(), &obj).await?;
        info!(cluster = %self.cluster, kind = %kind, ns = %ns, name = ?created.metadata.name, "kubehub: created");
        Ok(created)
    }

    async fn logs(&self, namespace: &str, pod: &str, container: &str) -> CorralResult<String> {
        use k8s_openapi::api::core::v1::Pod;
        let api: Api<Pod> = Api::namespaced(self.client()?, namespace);
        let lp = LogParams { container: Some(container.to_string()), tail_lines: Some(LOG_TAIL_LINES), ..Default::default() };
        let reader = api.log_stream(pod, &lp).await?;
        let lines = reader.lines();
        futures::pin_mut!(lines);
        let mut out = String::new();
        while let Some(line) = lines.try_next().await.map_err(|e| CorralError::Request(format!("reading logs of {}/{}: {}", pod, container, e)))? {
            out.push_str(&line);
            out.push('\n');
        }
        debug!(cluster = %self.cluster, pod = %pod, container = %container, bytes = out.len(), "kubehub: logs read");
        Ok(out)
    }

    async fn access_review(&self, subject: &Subject, check: &AccessCheck) -> CorralResult<bool> {
        use k8s_openapi::api::authorization::v1::{ResourceAttributes, SubjectAccessReview, SubjectAccessReviewSpec};
        let api: Api<SubjectAccessReview> = Api::all(self.client()?);
        let (user, groups) = match subject {
            Subject::User(u) => (Some(u.clone()), None),
            Subject::Group(g) => (None, Some(vec![g.clone()])),
        };
        let sar = SubjectAccessReview {
            spec: SubjectAccessReviewSpec {
                user,
                groups,
                resource_attributes: Some(ResourceAttributes {
                    namespace: non_empty(&check.namespace),
                    verb: non_empty(&check.verb),
                    group: non_empty(&check.group),
                    resource: non_empty(&check.resource),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        let created = api.create(&PostParams::default(), &sar).await?;
        let allowed = created.status.map(|s| s.allowed).unwrap_or(false);
        debug!(cluster = %self.cluster, subject = %subject, verb = %check.verb, resource = %check.resource, group = %check.group, allowed, "kubehub: access review");
        Ok(allowed)
    }
}
