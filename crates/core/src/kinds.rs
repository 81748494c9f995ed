//! Static kind registry: lower-cased kind name -> group/version/resource.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Group/version/resource identity of a kind, plus its canonical CamelCase name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceIdentity {
    pub group: String,
    pub version: String,
    /// Plural resource name used in request paths (e.g. `deployments`).
    pub resource: String,
    /// Lower-cased kind (e.g. `deployment`).
    pub lower_kind: String,
    /// Canonical kind (e.g. `Deployment`); for unknown kinds the input as given.
    pub kind: String,
}

impl ResourceIdentity {
    /// `group/version`, or bare `version` for the core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() { self.version.clone() } else { format!("{}/{}", self.group, self.version) }
    }

    /// UI-facing type: `group.kind` or the bare lower-cased kind for the core group.
    pub fn type_name(&self) -> String {
        if self.group.is_empty() { self.lower_kind.clone() } else { format!("{}.{}", self.group, self.lower_kind) }
    }

    /// Dashboard-style link path `/v1/{type}/{namespace}/{name}`; empty segments are omitted.
    pub fn steve_path(&self, namespace: &str, name: &str) -> String {
        let mut path = format!("/v1/{}", self.type_name());
        for seg in [namespace, name] {
            if !seg.is_empty() {
                path.push('/');
                path.push_str(seg);
            }
        }
        path
    }

    /// kube-rs dynamic resource descriptor for this identity.
    pub fn api_resource(&self) -> kube::core::ApiResource {
        kube::core::ApiResource {
            group: self.group.clone(),
            version: self.version.clone(),
            api_version: self.api_version(),
            kind: self.kind.clone(),
            plural: self.resource.clone(),
        }
    }
}

// (lower kind, group, version, plural, Kind)
const TABLE: &[(&str, &str, &str, &str, &str)] = &[
    // core
    ("pod", "", "v1", "pods", "Pod"),
    ("service", "", "v1", "services", "Service"),
    ("configmap", "", "v1", "configmaps", "ConfigMap"),
    ("secret", "", "v1", "secrets", "Secret"),
    ("namespace", "", "v1", "namespaces", "Namespace"),
    ("node", "", "v1", "nodes", "Node"),
    ("persistentvolume", "", "v1", "persistentvolumes", "PersistentVolume"),
    ("persistentvolumeclaim", "", "v1", "persistentvolumeclaims", "PersistentVolumeClaim"),
    ("serviceaccount", "", "v1", "serviceaccounts", "ServiceAccount"),
    ("event", "", "v1", "events", "Event"),
    ("endpoints", "", "v1", "endpoints", "Endpoints"),
    ("limitrange", "", "v1", "limitranges", "LimitRange"),
    ("resourcequota", "", "v1", "resourcequotas", "ResourceQuota"),
    ("replicationcontroller", "", "v1", "replicationcontrollers", "ReplicationController"),
    // apps
    ("deployment", "apps", "v1", "deployments", "Deployment"),
    ("statefulset", "apps", "v1", "statefulsets", "StatefulSet"),
    ("daemonset", "apps", "v1", "daemonsets", "DaemonSet"),
    ("replicaset", "apps", "v1", "replicasets", "ReplicaSet"),
    ("controllerrevision", "apps", "v1", "controllerrevisions", "ControllerRevision"),
    // batch
    ("job", "batch", "v1", "jobs", "Job"),
    ("cronjob", "batch", "v1", "cronjobs", "CronJob"),
    // networking
    ("ingress", "networking.k8s.io", "v1", "ingresses", "Ingress"),
    ("ingressclass", "networking.k8s.io", "v1", "ingressclasses", "IngressClass"),
    ("networkpolicy", "networking.k8s.io", "v1", "networkpolicies", "NetworkPolicy"),
    // autoscaling
    ("horizontalpodautoscaler", "autoscaling", "v2", "horizontalpodautoscalers", "HorizontalPodAutoscaler"),
    // rbac
    ("role", "rbac.authorization.k8s.io", "v1", "roles", "Role"),
    ("rolebinding", "rbac.authorization.k8s.io", "v1", "rolebindings", "RoleBinding"),
    ("clusterrole", "rbac.authorization.k8s.io", "v1", "clusterroles", "ClusterRole"),
    ("clusterrolebinding", "rbac.authorization.k8s.io", "v1", "clusterrolebindings", "ClusterRoleBinding"),
    // storage
    ("storageclass", "storage.k8s.io", "v1", "storageclasses", "StorageClass"),
    ("csidriver", "storage.k8s.io", "v1", "csidrivers", "CSIDriver"),
    ("csinode", "storage.k8s.io", "v1", "csinodes", "CSINode"),
    ("volumeattachment", "storage.k8s.io", "v1", "volumeattachments", "VolumeAttachment"),
    // crd
    ("customresourcedefinition", "apiextensions.k8s.io", "v1", "customresourcedefinitions", "CustomResourceDefinition"),
    // discovery
    ("endpointslice", "discovery.k8s.io", "v1", "endpointslices", "EndpointSlice"),
    // policy
    ("poddisruptionbudget", "policy", "v1", "poddisruptionbudgets", "PodDisruptionBudget"),
    // metrics
    ("podmetrics", "metrics.k8s.io", "v1beta1", "pods", "PodMetrics"),
    ("nodemetrics", "metrics.k8s.io", "v1beta1", "nodes", "NodeMetrics"),
    // management
    ("cluster", "management.cattle.io", "v3", "clusters", "Cluster"),
    ("project", "management.cattle.io", "v3", "projects", "Project"),
    ("user", "management.cattle.io", "v3", "users", "User"),
    ("globalrole", "management.cattle.io", "v3", "globalroles", "GlobalRole"),
    ("globalrolebinding", "management.cattle.io", "v3", "globalrolebindings", "GlobalRoleBinding"),
    ("roletemplate", "management.cattle.io", "v3", "roletemplates", "RoleTemplate"),
    ("projectroletemplatebinding", "management.cattle.io", "v3", "projectroletemplatebindings", "ProjectRoleTemplateBinding"),
    ("clusterroletemplatebinding", "management.cattle.io", "v3", "clusterroletemplatebindings", "ClusterRoleTemplateBinding"),
    ("setting", "management.cattle.io", "v3", "settings", "Setting"),
    // fleet
    ("gitrepo", "fleet.cattle.io", "v1alpha1", "gitrepos", "GitRepo"),
    ("bundle", "fleet.cattle.io", "v1alpha1", "bundles", "Bundle"),
    ("bundledeployment", "fleet.cattle.io", "v1alpha1", "bundledeployments", "BundleDeployment"),
    ("clustergroup", "fleet.cattle.io", "v1alpha1", "clustergroups", "ClusterGroup"),
    ("gitreporestriction", "fleet.cattle.io", "v1alpha1", "gitreporestrictions", "GitRepoRestriction"),
];

static REGISTRY: Lazy<HashMap<&'static str, ResourceIdentity>> = Lazy::new(|| {
    TABLE
        .iter()
        .map(|(lower, group, version, plural, kind)| {
            (*lower, ResourceIdentity {
                group: (*group).to_string(),
                version: (*version).to_string(),
                resource: (*plural).to_string(),
                lower_kind: (*lower).to_string(),
                kind: (*kind).to_string(),
            })
        })
        .collect()
});

/// Resolve a kind name (case-insensitive). Unknown kinds fall back to the core group,
/// version `v1`, with the input used unchanged as the resource segment.
pub fn resolve(kind: &str) -> ResourceIdentity {
    let lower = kind.to_ascii_lowercase();
    match REGISTRY.get(lower.as_str()) {
        Some(id) => id.clone(),
        None => ResourceIdentity {
            group: String::new(),
            version: "v1".to_string(),
            resource: kind.to_string(),
            lower_kind: lower,
            kind: kind.to_string(),
        },
    }
}

/// Whether the kind is present in the static table.
pub fn is_known(kind: &str) -> bool {
    REGISTRY.contains_key(kind.to_ascii_lowercase().as_str())
}

/// All known identities in table order.
pub fn kinds() -> Vec<ResourceIdentity> {
    TABLE.iter().map(|(lower, ..)| resolve(lower)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_known_kind_resolves_stably() {
        for id in kinds() {
            assert!(!id.resource.is_empty(), "{} has no plural", id.lower_kind);
            assert_eq!(resolve(&id.kind), id);
            assert_eq!(resolve(&id.kind).type_name(), id.type_name());
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(resolve("Deployment"), resolve("DEPLOYMENT"));
        assert_eq!(resolve("deployment").group, "apps");
        assert_eq!(resolve("Deployment").type_name(), "apps.deployment");
        assert_eq!(resolve("Pod").type_name(), "pod");
    }

    #[test]
    fn unknown_kind_falls_back_to_bare_name() {
        let id = resolve("Widget");
        assert!(id.group.is_empty());
        assert_eq!(id.resource, "Widget");
        assert_eq!(id.type_name(), "widget");
        assert!(!is_known("Widget"));
    }

    #[test]
    fn metrics_and_management_kinds() {
        let pm = resolve("PodMetrics");
        assert_eq!(pm.api_version(), "metrics.k8s.io/v1beta1");
        assert_eq!(pm.resource, "pods");
        let rt = resolve("roletemplate");
        assert_eq!(rt.api_version(), "management.cattle.io/v3");
        assert_eq!(rt.kind, "RoleTemplate");
    }

    #[test]
    fn steve_path_skips_empty_segments() {
        assert_eq!(resolve("deployment").steve_path("default", "web"), "/v1/apps.deployment/default/web");
        assert_eq!(resolve("node").steve_path("", "n1"), "/v1/node/n1");
        assert_eq!(resolve("namespace").steve_path("", ""), "/v1/namespace");
    }

    #[test]
    fn api_resource_matches_identity() {
        let ar = resolve("statefulset").api_resource();
        assert_eq!(ar.api_version, "apps/v1");
        assert_eq!(ar.plural, "statefulsets");
        assert_eq!(ar.kind, "StatefulSet");
    }
}
