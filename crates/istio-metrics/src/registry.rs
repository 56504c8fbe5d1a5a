//! Static registry of metric resource kinds served by the provider

use crate::models::{ApiResource, ApiResourceList, ResourceKind, API_GROUP_VERSION};

/// A kind that traffic metrics can be requested for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailableKind {
    /// Plural resource name used in URLs
    pub plural: &'static str,
    pub singular: &'static str,
    pub kind: &'static str,
    pub namespaced: bool,
}

const VERBS: &[&str] = &["get", "list"];

/// Kinds exposed through discovery, in a fixed order
pub const AVAILABLE_KINDS: &[AvailableKind] = &[
    AvailableKind {
        plural: "namespaces",
        singular: "namespace",
        kind: "Namespace",
        namespaced: false,
    },
    AvailableKind {
        plural: "deployments",
        singular: "deployment",
        kind: "Deployment",
        namespaced: true,
    },
    AvailableKind {
        plural: "pods",
        singular: "pod",
        kind: "Pod",
        namespaced: true,
    },
    AvailableKind {
        plural: "daemonsets",
        singular: "daemonset",
        kind: "DaemonSet",
        namespaced: true,
    },
    AvailableKind {
        plural: "statefulsets",
        singular: "statefulset",
        kind: "StatefulSet",
        namespaced: true,
    },
];

impl AvailableKind {
    pub fn resource_kind(&self) -> ResourceKind {
        ResourceKind::from_kind_name(self.kind)
    }

    fn to_api_resource(self) -> ApiResource {
        ApiResource {
            name: self.plural.to_string(),
            singular_name: self.singular.to_string(),
            namespaced: self.namespaced,
            kind: self.kind.to_string(),
            verbs: VERBS.iter().map(|v| v.to_string()).collect(),
        }
    }
}

/// Discovery list built from [`AVAILABLE_KINDS`]
pub fn supported_resources() -> ApiResourceList {
    ApiResourceList {
        kind: "APIResourceList".to_string(),
        api_version: "v1".to_string(),
        group_version: API_GROUP_VERSION.to_string(),
        resources: AVAILABLE_KINDS
            .iter()
            .map(|k| k.to_api_resource())
            .collect(),
    }
}

/// Find a registered kind by its plural URL segment
pub fn lookup_plural(plural: &str) -> Option<&'static AvailableKind> {
    AVAILABLE_KINDS.iter().find(|k| k.plural == plural)
}

/// Returns true if the kind name is served by discovery
pub fn is_registered(kind: &ResourceKind) -> bool {
    AVAILABLE_KINDS.iter().any(|k| k.kind == kind.name())
}
