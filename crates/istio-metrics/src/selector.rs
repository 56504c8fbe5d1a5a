//! Query template selection by resource kind and query class

use crate::config::{ProviderConfig, Queries};
use crate::models::ResourceKind;
use crate::registry;
use std::collections::HashMap;
use tracing::debug;

/// Which family of templates a request needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryClass {
    /// Metrics about the resource itself
    Resource,
    /// Metrics about traffic between the resource and its partners
    Edge,
}

impl QueryClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryClass::Resource => "resource",
            QueryClass::Edge => "edge",
        }
    }
}

/// Borrowing view over the configured query sets
#[derive(Debug, Clone, Copy)]
pub struct QuerySelector<'a> {
    config: &'a ProviderConfig,
}

impl<'a> QuerySelector<'a> {
    pub fn new(config: &'a ProviderConfig) -> Self {
        Self { config }
    }

    /// Query set for a kind
    ///
    /// Every kind that is not a namespace or a pod is a workload and uses the
    /// workload set, including kinds the registry does not list.
    pub fn query_set(&self, kind: &ResourceKind) -> &'a Queries {
        match kind {
            ResourceKind::Namespace => &self.config.namespace_queries,
            ResourceKind::Pod => &self.config.pod_queries,
            ResourceKind::Workload(name) => {
                if !registry::is_registered(kind) {
                    debug!(kind = %name, "Unregistered kind, using workload queries");
                }
                &self.config.workload_queries
            }
        }
    }

    /// Template mapping for a kind and class
    pub fn select(&self, kind: &ResourceKind, class: QueryClass) -> &'a HashMap<String, String> {
        let queries = self.query_set(kind);
        match class {
            QueryClass::Resource => &queries.resource_queries,
            QueryClass::Edge => &queries.edge_queries,
        }
    }
}
