//! Boundary to the metrics backend adapter
//!
//! An adapter evaluates query templates against the metrics backend and
//! shapes the resulting series into a [`TrafficMetricsList`]. Template
//! substitution and the backend wire protocol live behind this trait;
//! turning series labels into object references is done with the mapper
//! the provider hands over.

use crate::error::MetricsError;
use crate::labels::{EdgeMapper, ResourceMapper};
use crate::models::{Interval, ObjectReference, ResourceDetails, TrafficMetricsList};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Metric name to query template
pub type QueryTemplates = HashMap<String, String>;

/// Executes resolved query templates for one object over an interval
#[async_trait]
pub trait MetricsAdapter: Send + Sync {
    /// Evaluate resource-level templates for `obj`
    ///
    /// Each record's resource comes from `mapper`; series it cannot map
    /// are attributed to `obj`.
    async fn resource_metrics(
        &self,
        obj: &ObjectReference,
        interval: &Interval,
        queries: &QueryTemplates,
        mapper: ResourceMapper,
    ) -> Result<TrafficMetricsList, MetricsError>;

    /// Evaluate edge templates for `obj`, one record per traffic partner
    ///
    /// Each record's partner comes from `mapper`; series it cannot map
    /// produce records without an edge.
    async fn edge_metrics(
        &self,
        obj: &ObjectReference,
        interval: &Interval,
        details: &ResourceDetails,
        queries: &QueryTemplates,
        mapper: EdgeMapper,
    ) -> Result<TrafficMetricsList, MetricsError>;
}

#[async_trait]
impl<A: MetricsAdapter + ?Sized> MetricsAdapter for Arc<A> {
    async fn resource_metrics(
        &self,
        obj: &ObjectReference,
        interval: &Interval,
        queries: &QueryTemplates,
        mapper: ResourceMapper,
    ) -> Result<TrafficMetricsList, MetricsError> {
        (**self).resource_metrics(obj, interval, queries, mapper).await
    }

    async fn edge_metrics(
        &self,
        obj: &ObjectReference,
        interval: &Interval,
        details: &ResourceDetails,
        queries: &QueryTemplates,
        mapper: EdgeMapper,
    ) -> Result<TrafficMetricsList, MetricsError> {
        (**self)
            .edge_metrics(obj, interval, details, queries, mapper)
            .await
    }
}
