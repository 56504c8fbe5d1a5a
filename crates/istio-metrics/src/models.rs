//! Core data models for the traffic-metrics provider
//!
//! Request side: [`Query`], [`Interval`] and [`ResourceDetails`].
//! Response side: [`TrafficMetricsList`] and the discovery [`ApiResourceList`].

use crate::error::MetricsError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// API group/version served by the metrics API
pub const API_GROUP_VERSION: &str = "metrics.smi-spec.io/v1alpha1";

/// Kind of mesh resource a query targets
///
/// `Namespace` and `Pod` each have their own query set. Every other kind
/// name (Deployment, StatefulSet, DaemonSet, or anything not known today)
/// parses to `Workload` and is served by the workload query set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResourceKind {
    Namespace,
    Pod,
    /// Generic workload, carrying the Kubernetes kind name
    Workload(String),
}

impl ResourceKind {
    /// Parse a Kubernetes kind name
    pub fn from_kind_name(name: &str) -> Self {
        match name {
            "Namespace" => ResourceKind::Namespace,
            "Pod" => ResourceKind::Pod,
            other => ResourceKind::Workload(other.to_string()),
        }
    }

    /// Kubernetes kind name
    pub fn name(&self) -> &str {
        match self {
            ResourceKind::Namespace => "Namespace",
            ResourceKind::Pod => "Pod",
            ResourceKind::Workload(name) => name,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<String> for ResourceKind {
    fn from(name: String) -> Self {
        ResourceKind::from_kind_name(&name)
    }
}

impl From<ResourceKind> for String {
    fn from(kind: ResourceKind) -> Self {
        kind.name().to_string()
    }
}

/// Query descriptor identifying the target of a metrics request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub kind: ResourceKind,
    /// Resource name; `None` aggregates over the namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub namespace: String,
}

impl Query {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>) -> Self {
        Self {
            kind,
            name: None,
            namespace: namespace.into(),
        }
    }

    pub fn named(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: Some(name.into()),
            namespace: namespace.into(),
        }
    }

    /// Name of the targeted instance, treating an empty name as absent
    pub fn instance_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|name| !name.is_empty())
    }
}

/// Reference to a Kubernetes object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    pub kind: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ObjectReference {
    pub fn new(kind: impl Into<String>, namespace: impl Into<String>, name: Option<String>) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name,
        }
    }

    /// Build the reference for a query; an empty name is left unset
    pub fn for_query(query: &Query) -> Self {
        Self {
            kind: query.kind.name().to_string(),
            namespace: query.namespace.clone(),
            name: query.instance_name().map(str::to_string),
        }
    }
}

/// Direction of traffic relative to the queried resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeDirection {
    /// Traffic arriving from the partner (upstream)
    #[default]
    From,
    /// Traffic sent to the partner (downstream)
    To,
}

impl EdgeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeDirection::From => "from",
            EdgeDirection::To => "to",
        }
    }
}

/// Edge parameters, passed through to the metrics adapter untouched
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDetails {
    pub direction: EdgeDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,
}

impl ResourceDetails {
    pub fn new(direction: EdgeDirection) -> Self {
        Self {
            direction,
            ..Default::default()
        }
    }
}

/// Half-open time range `[start, end)` with an optional evaluation step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<Duration>,
}

impl Interval {
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Option<Duration>,
    ) -> Result<Self, MetricsError> {
        if start >= end {
            return Err(MetricsError::InvalidInterval(format!(
                "start {} is not before end {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end, step })
    }

    /// Interval of `window` length ending at `end`
    pub fn ending_at(end: DateTime<Utc>, window: Duration) -> Result<Self, MetricsError> {
        let window = chrono::Duration::from_std(window)
            .map_err(|e| MetricsError::InvalidInterval(e.to_string()))?;
        let start = end.checked_sub_signed(window).ok_or_else(|| {
            MetricsError::InvalidInterval(format!(
                "window of {}s reaches before the earliest representable time",
                window.num_seconds()
            ))
        })?;
        Self::new(start, end, None)
    }

    pub fn window(&self) -> chrono::Duration {
        self.end - self.start
    }
}

/// A single named measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// `None` when the backend produced no sample
    pub value: Option<f64>,
}

impl Metric {
    pub fn new(name: impl Into<String>, value: Option<f64>) -> Self {
        Self {
            name: name.into(),
            unit: None,
            value,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

/// Traffic partner of an edge record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub direction: EdgeDirection,
    pub resource: ObjectReference,
}

/// Measurements for one resource (or one resource/partner pair)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficMetrics {
    pub resource: ObjectReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge: Option<Edge>,
    pub timestamp: DateTime<Utc>,
    pub window_secs: i64,
    pub metrics: Vec<Metric>,
}

impl TrafficMetrics {
    /// Empty record covering `interval`
    pub fn for_interval(resource: ObjectReference, interval: &Interval) -> Self {
        Self {
            resource,
            edge: None,
            timestamp: interval.end,
            window_secs: interval.window().num_seconds(),
            metrics: Vec::new(),
        }
    }

    pub fn with_edge(mut self, direction: EdgeDirection, partner: ObjectReference) -> Self {
        self.edge = Some(Edge {
            direction,
            resource: partner,
        });
        self
    }

    pub fn metric(&self, name: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.name == name)
    }
}

/// Output envelope returned for every metrics request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficMetricsList {
    pub kind: String,
    pub api_version: String,
    pub resource: ObjectReference,
    pub items: Vec<TrafficMetrics>,
}

impl TrafficMetricsList {
    pub fn new(resource: ObjectReference) -> Self {
        Self {
            kind: "TrafficMetricsList".to_string(),
            api_version: API_GROUP_VERSION.to_string(),
            resource,
            items: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Discovery entry for one metric resource kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResource {
    pub name: String,
    pub singular_name: String,
    pub namespaced: bool,
    pub kind: String,
    pub verbs: Vec<String>,
}

/// Discovery response listing supported metric resource kinds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResourceList {
    pub kind: String,
    pub api_version: String,
    pub group_version: String,
    pub resources: Vec<ApiResource>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_kind_parsing_falls_back_to_workload() {
        assert_eq!(ResourceKind::from_kind_name("Namespace"), ResourceKind::Namespace);
        assert_eq!(ResourceKind::from_kind_name("Pod"), ResourceKind::Pod);
        assert_eq!(
            ResourceKind::from_kind_name("Deployment"),
            ResourceKind::Workload("Deployment".to_string())
        );
        assert_eq!(ResourceKind::from_kind_name("Widget").name(), "Widget");
    }

    #[test]
    fn test_kind_serializes_as_kind_name() {
        let json = serde_json::to_string(&ResourceKind::Workload("StatefulSet".into())).unwrap();
        assert_eq!(json, "\"StatefulSet\"");

        let kind: ResourceKind = serde_json::from_str("\"Pod\"").unwrap();
        assert_eq!(kind, ResourceKind::Pod);
    }

    #[test]
    fn test_object_reference_drops_empty_name() {
        let query = Query::named(ResourceKind::Namespace, "prod", "");
        let obj = ObjectReference::for_query(&query);

        assert_eq!(obj.kind, "Namespace");
        assert_eq!(obj.namespace, "prod");
        assert_eq!(obj.name, None);
    }

    #[test]
    fn test_interval_rejects_inverted_range() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert!(Interval::new(t, t, None).is_err());

        let interval = Interval::ending_at(t, Duration::from_secs(30)).unwrap();
        assert_eq!(interval.window().num_seconds(), 30);
        assert_eq!(interval.end, t);
    }

    #[test]
    fn test_window_past_earliest_time_is_invalid() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let result = Interval::ending_at(t, Duration::from_secs(100_000_000_000_000));
        assert!(matches!(result, Err(MetricsError::InvalidInterval(_))));

        let result = Interval::ending_at(t, Duration::from_secs(u64::MAX));
        assert!(matches!(result, Err(MetricsError::InvalidInterval(_))));
    }

    #[test]
    fn test_traffic_metrics_json_shape() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let interval = Interval::ending_at(t, Duration::from_secs(60)).unwrap();
        let resource = ObjectReference::new("Pod", "prod", Some("checkout".into()));
        let partner = ObjectReference::new("Pod", "prod", Some("cart".into()));

        let mut record =
            TrafficMetrics::for_interval(resource.clone(), &interval).with_edge(EdgeDirection::To, partner);
        record.metrics.push(Metric::new("success_count", Some(42.0)));

        let mut list = TrafficMetricsList::new(resource);
        list.items.push(record);

        let json = serde_json::to_value(&list).unwrap();
        assert_eq!(json["kind"], "TrafficMetricsList");
        assert_eq!(json["apiVersion"], API_GROUP_VERSION);
        assert_eq!(json["items"][0]["windowSecs"], 60);
        assert_eq!(json["items"][0]["edge"]["direction"], "to");
        assert_eq!(json["items"][0]["edge"]["resource"]["name"], "cart");
        assert_eq!(json["items"][0]["metrics"][0]["value"], 42.0);
    }
}
