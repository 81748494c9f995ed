//! Corral tool façade.
//!
//! Each tool takes a JSON object of named parameters plus per-request
//! credentials, runs one workflow against the addressed cluster and returns a
//! [`ToolOutput`]: the shaped `{"llm","uiContext"}` payload, a plain message,
//! or a confirmation request carrying suggested follow-up calls.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use corral_core::{shape, CorralError, CorralResult, Shaped};
use corral_kubehub::{Connector, Credentials, KubeConnector, ResourceClient};
use corral_ops::{NestedToolCall, PermissionRequest, Verdict};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{info, warn};

pub mod params;

use params::{cluster_or_default, decode, require, ClusterArgs, CreateArgs, ImagesArgs, ListArgs, PatchArgs, ResourceArgs, WorkloadArgs};

/// Name and description of one callable tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
}

pub const TOOLS: &[ToolSpec] = &[
    ToolSpec { name: "get_kubernetes_resource", description: "Fetch one resource by cluster, kind, namespace and name." },
    ToolSpec { name: "list_kubernetes_resources", description: "List resources of a kind, optionally in one namespace and filtered by a label selector." },
    ToolSpec { name: "patch_kubernetes_resource", description: "Apply a JSON Patch (RFC 6902) operations array to a resource." },
    ToolSpec { name: "create_kubernetes_resource", description: "Create a resource from a document or its JSON/YAML text." },
    ToolSpec { name: "inspect_pod", description: "Pod details with its owning workload, metrics and recent container logs." },
    ToolSpec { name: "get_deployment_details", description: "A deployment and the pods its selector matches." },
    ToolSpec { name: "get_node_metrics", description: "All nodes of a cluster with their resource usage when metrics are available." },
    ToolSpec { name: "get_cluster_images", description: "Unique container images running in each of the given clusters." },
    ToolSpec { name: "update_user_permissions", description: "Check RBAC rules for a user or group and propose a RoleTemplate and binding when any is denied." },
];

/// Follow-up calls the caller should confirm before issuing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub message: String,
    #[serde(rename = "toolCalls")]
    pub tool_calls: Vec<NestedToolCall>,
}

/// Confirmation document: model text plus the structured suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confirmation {
    pub llm: String,
    pub confirmation: ConfirmationRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Payload(Shaped),
    Text(String),
    Confirmation(Confirmation),
}

impl ToolOutput {
    /// Wire text handed back to the caller.
    pub fn render(&self) -> CorralResult<String> {
        match self {
            ToolOutput::Payload(s) => s.to_json(),
            ToolOutput::Text(t) => Ok(t.clone()),
            ToolOutput::Confirmation(c) => serde_json::to_string(c).map_err(|e| CorralError::Marshal(e.to_string())),
        }
    }
}

/// Tool error text; remote messages are passed through unchanged.
pub fn render_error(tool: &str, e: &CorralError) -> String {
    format!("{} failed: {}", tool, e)
}

/// Tool dispatcher. Every call builds a fresh client for its cluster.
pub struct Tools {
    connector: Arc<dyn Connector>,
}

impl Default for Tools {
    fn default() -> Self {
        Self::new(Arc::new(KubeConnector))
    }
}

impl Tools {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    pub fn specs(&self) -> &'static [ToolSpec] {
        TOOLS
    }

    fn client(&self, creds: &Credentials, cluster: &str) -> Arc<dyn ResourceClient> {
        self.connector.connect(creds, cluster_or_default(cluster))
    }

    /// Dispatch by tool name. Every outcome, argument decoding failures
    /// included, is counted and timed under the tool's label.
    pub async fn call(&self, tool: &str, args: Json, creds: &Credentials) -> CorralResult<ToolOutput> {
        let t0 = Instant::now();
        counter!("tool_calls", 1, "tool" => tool.to_string());
        info!(tool = %tool, "api: tool call start");
        let res = self.dispatch(tool, args, creds).await;
        histogram!("tool_latency_ms", t0.elapsed().as_secs_f64() * 1000.0, "tool" => tool.to_string());
        match &res {
            Ok(_) => info!(tool = %tool, took_ms = %t0.elapsed().as_millis(), "api: tool call ok"),
            Err(e) => {
                counter!("tool_errors", 1, "tool" => tool.to_string());
                warn!(tool = %tool, error = %e, took_ms = %t0.elapsed().as_millis(), "api: tool call failed");
            }
        }
        res
    }

    async fn dispatch(&self, tool: &str, args: Json, creds: &Credentials) -> CorralResult<ToolOutput> {
        match tool {
            "get_kubernetes_resource" => self.get_resource(decode(args)?, creds).await,
            "list_kubernetes_resources" => self.list_resources(decode(args)?, creds).await,
            "patch_kubernetes_resource" => self.patch_resource(decode(args)?, creds).await,
            "create_kubernetes_resource" => self.create_resource(decode(args)?, creds).await,
            "inspect_pod" => self.inspect_pod(decode(args)?, creds).await,
            "get_deployment_details" => self.deployment_details(decode(args)?, creds).await,
            "get_node_metrics" => self.node_metrics(decode(args)?, creds).await,
            "get_cluster_images" => self.cluster_images(decode(args)?, creds).await,
            "update_user_permissions" => self.update_permissions(decode(args)?, creds).await,
            other => Err(CorralError::Input(format!("unknown tool: {}", other))),
        }
    }

    pub async fn get_resource(&self, a: ResourceArgs, creds: &Credentials) -> CorralResult<ToolOutput> {
        require("kind", &a.kind)?;
        require("name", &a.name)?;
        let cluster = cluster_or_default(&a.cluster);
        let obj = self.client(creds, cluster).get(&a.kind, &a.namespace, &a.name).await?;
        Ok(ToolOutput::Payload(shape(vec![obj], cluster)?))
    }

    pub async fn list_resources(&self, a: ListArgs, creds: &Credentials) -> CorralResult<ToolOutput> {
        require("kind", &a.kind)?;
        let cluster = cluster_or_default(&a.cluster);
        let items = self.client(creds, cluster).list(&a.kind, &a.namespace, a.label_selector.as_deref()).await?;
        Ok(ToolOutput::Payload(shape(items, cluster)?))
    }

    pub async fn patch_resource(&self, a: PatchArgs, creds: &Credentials) -> CorralResult<ToolOutput> {
        require("kind", &a.kind)?;
        require("name", &a.name)?;
        let cluster = cluster_or_default(&a.cluster);
        let obj = self.client(creds, cluster).patch(&a.kind, &a.namespace, &a.name, &a.patch).await?;
        Ok(ToolOutput::Payload(shape(vec![obj], cluster)?))
    }

    pub async fn create_resource(&self, a: CreateArgs, creds: &Credentials) -> CorralResult<ToolOutput> {
        require("kind", &a.kind)?;
        if a.resource.is_null() {
            return Err(CorralError::Input("resource is required".into()));
        }
        let cluster = cluster_or_default(&a.cluster);
        let obj = self.client(creds, cluster).create(&a.kind, &a.namespace, &a.resource).await?;
        Ok(ToolOutput::Payload(shape(vec![obj], cluster)?))
    }

    pub async fn inspect_pod(&self, a: WorkloadArgs, creds: &Credentials) -> CorralResult<ToolOutput> {
        require("namespace", &a.namespace)?;
        require("name", &a.name)?;
        let cluster = cluster_or_default(&a.cluster);
        let client = self.client(creds, cluster);
        let items = corral_ops::inspect_pod(client.as_ref(), &a.namespace, &a.name).await?;
        Ok(ToolOutput::Payload(shape(items, cluster)?))
    }

    pub async fn deployment_details(&self, a: WorkloadArgs, creds: &Credentials) -> CorralResult<ToolOutput> {
        require("namespace", &a.namespace)?;
        require("name", &a.name)?;
        let cluster = cluster_or_default(&a.cluster);
        let client = self.client(creds, cluster);
        let items = corral_ops::deployment_details(client.as_ref(), &a.namespace, &a.name).await?;
        Ok(ToolOutput::Payload(shape(items, cluster)?))
    }

    pub async fn node_metrics(&self, a: ClusterArgs, creds: &Credentials) -> CorralResult<ToolOutput> {
        let cluster = cluster_or_default(&a.cluster);
        let client = self.client(creds, cluster);
        let items = corral_ops::node_metrics(client.as_ref()).await?;
        Ok(ToolOutput::Payload(shape(items, cluster)?))
    }

    pub async fn cluster_images(&self, a: ImagesArgs, creds: &Credentials) -> CorralResult<ToolOutput> {
        let clusters = if a.clusters.is_empty() { vec![String::new()] } else { a.clusters };
        let mut by_cluster: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for c in &clusters {
            let cluster = cluster_or_default(c);
            let client = self.client(creds, cluster);
            by_cluster.insert(cluster.to_string(), corral_ops::cluster_images(client.as_ref()).await?);
        }
        let llm = serde_json::to_value(&by_cluster).map_err(|e| CorralError::Marshal(e.to_string()))?;
        Ok(ToolOutput::Payload(Shaped { llm, ui_context: Vec::new() }))
    }

    pub async fn update_permissions(&self, mut req: PermissionRequest, creds: &Credentials) -> CorralResult<ToolOutput> {
        req.cluster = cluster_or_default(&req.cluster).to_string();
        let client = self.client(creds, &req.cluster);
        match corral_ops::evaluate(client.as_ref(), &req).await? {
            Verdict::Allowed { message } => Ok(ToolOutput::Text(message)),
            Verdict::NeedsConfirmation(bundle) => {
                let message = bundle.message();
                Ok(ToolOutput::Confirmation(Confirmation {
                    llm: message.clone(),
                    confirmation: ConfirmationRequest { message, tool_calls: bundle.tool_calls() },
                }))
            }
        }
    }
}
