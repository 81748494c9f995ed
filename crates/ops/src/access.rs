//! Permission evaluation and remediation.
//!
//! Every (verb, resource, apiGroup) triple of every rule is checked against the
//! cluster's authorization API. If any triple is denied the caller gets a
//! [`RemediationBundle`]: a RoleTemplate plus a project or cluster binding,
//! offered as follow-up `create_kubernetes_resource` calls. Nothing is created here.

use std::fmt;
use std::time::Instant;

use corral_core::{resolve, CorralError, CorralResult};
use corral_kubehub::{AccessCheck, ResourceClient, Subject};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use tracing::{info, warn};
use uuid::Uuid;

/// Tool the follow-up calls are addressed to.
pub const CREATE_TOOL: &str = "create_kubernetes_resource";
/// Cluster that hosts management objects.
pub const MANAGEMENT_CLUSTER: &str = "local";

/// One caller-supplied RBAC rule. An empty list becomes a single `""` entry:
/// for `apiGroups` that is the core group, both in the access review and in
/// the granted RoleTemplate rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRule {
    #[serde(default)]
    pub verbs: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub api_groups: Vec<String>,
}

fn or_wildcard(v: &[String]) -> Vec<String> {
    if v.is_empty() { vec![String::new()] } else { v.to_vec() }
}

impl AccessRule {
    /// Replace each empty list with a single empty-string entry so the cross product is never empty.
    pub fn normalized(&self) -> AccessRule {
        AccessRule { verbs: or_wildcard(&self.verbs), resources: or_wildcard(&self.resources), api_groups: or_wildcard(&self.api_groups) }
    }

    /// verbs x resources x apiGroups of the normalized rule.
    pub fn evaluations(&self) -> Vec<RuleEvaluation> {
        let n = self.normalized();
        let mut out = Vec::with_capacity(n.verbs.len() * n.resources.len() * n.api_groups.len());
        for verb in &n.verbs {
            for resource in &n.resources {
                for api_group in &n.api_groups {
                    out.push(RuleEvaluation { verb: verb.clone(), api_group: api_group.clone(), resource: resource.clone() });
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleEvaluation {
    pub verb: String,
    pub api_group: String,
    pub resource: String,
}

impl fmt::Display for RuleEvaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let or_any = |s: &str| if s.is_empty() { "*".to_string() } else { s.to_string() };
        let group = if self.api_group.is_empty() { "core".to_string() } else { self.api_group.clone() };
        write!(f, "{} {} ({})", or_any(&self.verb), or_any(&self.resource), group)
    }
}

/// Inputs of one permission check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub rules: Vec<AccessRule>,
}

impl PermissionRequest {
    /// Exactly one of user/group must be given.
    pub fn subject(&self) -> CorralResult<Subject> {
        let user = self.user.as_deref().filter(|s| !s.is_empty());
        let group = self.group.as_deref().filter(|s| !s.is_empty());
        match (user, group) {
            (Some(u), None) => Ok(Subject::User(u.to_string())),
            (None, Some(g)) => Ok(Subject::Group(g.to_string())),
            (None, None) => Err(CorralError::Input("either user or group is required".into())),
            (Some(_), Some(_)) => Err(CorralError::Input("specify either user or group, not both".into())),
        }
    }

    fn project(&self) -> Option<&str> {
        self.project.as_deref().filter(|p| !p.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingKind {
    ProjectRoleTemplateBinding,
    ClusterRoleTemplateBinding,
}

impl BindingKind {
    fn name_prefix(self) -> &'static str {
        match self {
            BindingKind::ProjectRoleTemplateBinding => "prtb",
            BindingKind::ClusterRoleTemplateBinding => "crtb",
        }
    }

    fn kind(self) -> &'static str {
        match self {
            BindingKind::ProjectRoleTemplateBinding => "ProjectRoleTemplateBinding",
            BindingKind::ClusterRoleTemplateBinding => "ClusterRoleTemplateBinding",
        }
    }
}

/// A suggested call the caller should confirm and issue itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedToolCall {
    pub name: String,
    pub arguments: Json,
}

/// Proposed access objects for a denied check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationBundle {
    pub role_template: Json,
    pub binding: Json,
    pub binding_kind: BindingKind,
    pub subject: String,
    /// Triples that were denied, in evaluation order.
    pub denied: Vec<RuleEvaluation>,
}

impl RemediationBundle {
    fn name_of(doc: &Json) -> &str {
        doc.get("metadata").and_then(|m| m.get("name")).and_then(|n| n.as_str()).unwrap_or("")
    }

    pub fn role_template_name(&self) -> &str {
        Self::name_of(&self.role_template)
    }

    pub fn binding_name(&self) -> &str {
        Self::name_of(&self.binding)
    }

    /// Human-readable text asking the caller to confirm the creation.
    pub fn message(&self) -> String {
        let denied: Vec<String> = self.denied.iter().map(|d| d.to_string()).collect();
        format!(
            "{} is missing permissions: {}. To grant them, confirm creating RoleTemplate {} and {} {}.",
            self.subject,
            denied.join(", "),
            self.role_template_name(),
            self.binding_kind.kind(),
            self.binding_name(),
        )
    }

    /// One create call per object, role template first.
    pub fn tool_calls(&self) -> Vec<NestedToolCall> {
        [("RoleTemplate", &self.role_template), (self.binding_kind.kind(), &self.binding)]
            .into_iter()
            .map(|(kind, doc)| {
                let namespace = doc.get("metadata").and_then(|m| m.get("namespace")).and_then(|n| n.as_str()).unwrap_or("");
                NestedToolCall {
                    name: CREATE_TOOL.to_string(),
                    arguments: json!({
                        "cluster": MANAGEMENT_CLUSTER,
                        "kind": kind,
                        "namespace": namespace,
                        "resource": doc,
                    }),
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Allowed { message: String },
    NeedsConfirmation(RemediationBundle),
}

fn generate_name(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &suffix[..8])
}

fn subject_fields(subject: &Subject) -> (&'static str, &str) {
    match subject {
        Subject::User(u) => ("userName", u),
        Subject::Group(g) => ("groupPrincipalName", g),
    }
}

/// Build the RoleTemplate and binding granting `rules` to the request's subject.
pub fn remediation(req: &PermissionRequest, subject: &Subject, denied: Vec<RuleEvaluation>) -> RemediationBundle {
    let rules: Vec<AccessRule> = req.rules.iter().map(AccessRule::normalized).collect();
    let rt = resolve("RoleTemplate");
    let rt_name = generate_name("rt");
    let context = if req.project().is_some() { "project" } else { "cluster" };
    let role_template = json!({
        "apiVersion": rt.api_version(),
        "kind": rt.kind,
        "metadata": {"name": rt_name},
        "context": context,
        "displayName": format!("{} access for {}", context, subject.name()),
        "rules": rules,
    });
    let (binding_kind, namespace, scope_field, scope_value) = match req.project() {
        Some(project) => (
            BindingKind::ProjectRoleTemplateBinding,
            format!("{}-{}", req.cluster, project),
            "projectName",
            format!("{}:{}", req.cluster, project),
        ),
        None => (BindingKind::ClusterRoleTemplateBinding, req.cluster.clone(), "clusterName", req.cluster.clone()),
    };
    let b = resolve(binding_kind.kind());
    let (subject_field, subject_name) = subject_fields(subject);
    let mut binding = json!({
        "apiVersion": b.api_version(),
        "kind": b.kind,
        "metadata": {"name": generate_name(binding_kind.name_prefix()), "namespace": namespace},
        "roleTemplateName": rt_name,
    });
    binding[scope_field] = Json::String(scope_value);
    binding[subject_field] = Json::String(subject_name.to_string());
    RemediationBundle { role_template, binding, binding_kind, subject: subject.to_string(), denied }
}

/// Check every triple of every rule without short-circuiting; any denial yields a remediation bundle.
pub async fn evaluate(client: &dyn ResourceClient, req: &PermissionRequest) -> CorralResult<Verdict> {
    let subject = req.subject()?;
    let t0 = Instant::now();
    let mut allowed = true;
    let mut denied = Vec::new();
    let mut checked = 0usize;
    for rule in &req.rules {
        for ev in rule.evaluations() {
            let check = AccessCheck {
                namespace: req.namespace.clone(),
                verb: ev.verb.clone(),
                group: ev.api_group.clone(),
                resource: ev.resource.clone(),
            };
            checked += 1;
            if !client.access_review(&subject, &check).await? {
                allowed = false;
                denied.push(ev);
            }
        }
    }
    info!(subject = %subject, checked, denied = denied.len(), took_ms = %t0.elapsed().as_millis(), "ops: permission check done");
    if allowed {
        let scope = if req.namespace.is_empty() { String::new() } else { format!(" in namespace {}", req.namespace) };
        return Ok(Verdict::Allowed { message: format!("{} already has the requested permissions{}", subject, scope) });
    }
    let bundle = remediation(req, &subject, denied);
    warn!(subject = %subject, role_template = %bundle.role_template_name(), binding = %bundle.binding_name(), "ops: permissions missing; proposing remediation");
    Ok(Verdict::NeedsConfirmation(bundle))
}
