//! Provider configuration
//!
//! One query set per resource kind, each mapping metric names to PromQL
//! templates. Templates are opaque here and only interpreted by the
//! metrics adapter.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Environment variable prefix for overrides (e.g. `ISTIO_METRICS_PROMETHEUSURL`)
pub const ENV_PREFIX: &str = "ISTIO_METRICS";

/// Metric name to query template mappings for one resource kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Queries {
    /// Queries describing a single resource
    #[serde(default, rename = "resourceQueries")]
    pub resource_queries: HashMap<String, String>,

    /// Queries describing traffic between a resource and its partners
    #[serde(default, rename = "edgeQueries")]
    pub edge_queries: HashMap<String, String>,
}

/// Provider configuration, immutable once the provider is built
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProviderConfig {
    /// Address of the Prometheus server
    #[serde(rename = "prometheusUrl")]
    pub prometheus_url: String,

    #[serde(default, rename = "namespaceQueries")]
    pub namespace_queries: Queries,

    #[serde(default, rename = "podQueries")]
    pub pod_queries: Queries,

    #[serde(default, rename = "workloadQueries")]
    pub workload_queries: Queries,
}

impl ProviderConfig {
    /// Load configuration from a YAML file, with environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read provider config from {:?}", path))?;

        Self::from_yaml(&content)?.with_overrides(config::Environment::with_prefix(ENV_PREFIX))
    }

    /// Parse configuration from a YAML document
    ///
    /// Metric names are kept exactly as written.
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse provider config")
    }

    /// Apply the backend address override from `env`, if set
    pub fn with_overrides(mut self, env: config::Environment) -> Result<Self> {
        let overrides = config::Config::builder()
            .add_source(env)
            .build()
            .context("Failed to read environment overrides")?;

        if let Ok(url) = overrides.get_string("prometheusurl") {
            self.prometheus_url = url;
        }

        Ok(self)
    }

    /// Total number of configured templates across all query sets
    pub fn template_count(&self) -> usize {
        [&self.namespace_queries, &self.pod_queries, &self.workload_queries]
            .iter()
            .map(|q| q.resource_queries.len() + q.edge_queries.len())
            .sum()
    }
}
