//! Istio traffic-metrics provider
//!
//! Resolves the query templates for a request, builds the object
//! reference and hands both to the metrics adapter together with the
//! Istio label mapper for the request. Adapter results and failures are
//! returned to the caller unchanged.

use crate::adapter::MetricsAdapter;
use crate::config::ProviderConfig;
use crate::context::RequestContext;
use crate::error::MetricsError;
use crate::labels;
use crate::models::{
    ApiResourceList, Interval, ObjectReference, Query, ResourceDetails, TrafficMetricsList,
};
use crate::observability::{operations, ProviderMetrics, StructuredLogger};
use crate::registry;
use crate::selector::{QueryClass, QuerySelector};
use async_trait::async_trait;
use std::time::Instant;
use url::Url;

/// Operations a metrics API server needs from a mesh provider
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Metric resource kinds this provider serves
    async fn supported_resources(
        &self,
        ctx: &RequestContext,
    ) -> Result<ApiResourceList, MetricsError>;

    /// Metrics for a single resource, or a namespace aggregate when the
    /// query has no name
    async fn resource_metrics(
        &self,
        ctx: &RequestContext,
        query: &Query,
        interval: &Interval,
    ) -> Result<TrafficMetricsList, MetricsError>;

    /// Metrics for traffic between a resource and its partners
    async fn edge_metrics(
        &self,
        ctx: &RequestContext,
        query: &Query,
        interval: &Interval,
        details: &ResourceDetails,
    ) -> Result<TrafficMetricsList, MetricsError>;
}

/// Provider answering metrics requests with Istio query templates
pub struct IstioProvider<A> {
    config: ProviderConfig,
    backend_url: Option<Url>,
    adapter: A,
    metrics: ProviderMetrics,
    logger: StructuredLogger,
}

impl<A: MetricsAdapter> IstioProvider<A> {
    /// Build a provider, connecting the adapter to the configured backend
    ///
    /// Fails if `prometheus_url` is not a valid http(s) URL, or with
    /// whatever error `connect` returns.
    pub fn new<F>(config: ProviderConfig, connect: F) -> Result<Self, MetricsError>
    where
        F: FnOnce(&Url) -> Result<A, MetricsError>,
    {
        let backend_url = parse_backend_url(&config.prometheus_url)?;
        let adapter = connect(&backend_url)?;

        Ok(Self::build(config, Some(backend_url), adapter))
    }

    /// Build a provider around an adapter that is already connected
    pub fn with_adapter(config: ProviderConfig, adapter: A) -> Self {
        Self::build(config, None, adapter)
    }

    fn build(config: ProviderConfig, backend_url: Option<Url>, adapter: A) -> Self {
        let provider = Self {
            config,
            backend_url,
            adapter,
            metrics: ProviderMetrics::new(),
            logger: StructuredLogger::new("istio"),
        };
        provider.logger.log_startup(
            provider.config.prometheus_url.as_str(),
            provider.config.template_count(),
        );

        provider
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Backend address, when the provider connected the adapter itself
    pub fn backend_url(&self) -> Option<&Url> {
        self.backend_url.as_ref()
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn selector(&self) -> QuerySelector<'_> {
        QuerySelector::new(&self.config)
    }

    fn finish(
        &self,
        operation: &str,
        obj: &ObjectReference,
        started: Instant,
        result: Result<TrafficMetricsList, MetricsError>,
    ) -> Result<TrafficMetricsList, MetricsError> {
        let elapsed = started.elapsed().as_secs_f64();
        self.metrics.observe_duration(operation, elapsed);

        match &result {
            Ok(list) => self.logger.log_request(operation, obj, list.len(), elapsed),
            Err(err) => {
                self.metrics.inc_errors(operation, err);
                self.logger.log_request_failed(operation, obj, err);
            }
        }

        result
    }
}

fn parse_backend_url(address: &str) -> Result<Url, MetricsError> {
    let url = Url::parse(address).map_err(|source| MetricsError::InvalidBackendAddress {
        address: address.to_string(),
        source,
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(MetricsError::UnsupportedBackendScheme {
            address: address.to_string(),
            scheme: scheme.to_string(),
        }),
    }
}

fn require_namespace(query: &Query) -> Result<(), MetricsError> {
    if query.namespace.is_empty() {
        return Err(MetricsError::InvalidQuery(format!(
            "namespace is required for {} metrics",
            query.kind
        )));
    }
    Ok(())
}

fn require_name(query: &Query) -> Result<(), MetricsError> {
    if query.instance_name().is_none() {
        return Err(MetricsError::InvalidQuery(format!(
            "name is required for {} edge metrics",
            query.kind
        )));
    }
    Ok(())
}

#[async_trait]
impl<A: MetricsAdapter> MetricsProvider for IstioProvider<A> {
    async fn supported_resources(
        &self,
        _ctx: &RequestContext,
    ) -> Result<ApiResourceList, MetricsError> {
        self.metrics.inc_requests(operations::DISCOVERY, "all");
        Ok(registry::supported_resources())
    }

    async fn resource_metrics(
        &self,
        ctx: &RequestContext,
        query: &Query,
        interval: &Interval,
    ) -> Result<TrafficMetricsList, MetricsError> {
        let started = Instant::now();
        let obj = ObjectReference::for_query(query);
        self.metrics
            .inc_requests(operations::RESOURCE_METRICS, query.kind.name());

        let result = match require_namespace(query) {
            Ok(()) => {
                let queries = self.selector().select(&query.kind, QueryClass::Resource);
                ctx.run(self.adapter.resource_metrics(
                    &obj,
                    interval,
                    queries,
                    labels::resource_reference,
                ))
                .await
            }
            Err(err) => Err(err),
        };

        self.finish(operations::RESOURCE_METRICS, &obj, started, result)
    }

    async fn edge_metrics(
        &self,
        ctx: &RequestContext,
        query: &Query,
        interval: &Interval,
        details: &ResourceDetails,
    ) -> Result<TrafficMetricsList, MetricsError> {
        let started = Instant::now();
        let obj = ObjectReference::for_query(query);
        self.metrics
            .inc_requests(operations::EDGE_METRICS, query.kind.name());

        let result = match require_namespace(query).and_then(|_| require_name(query)) {
            Ok(()) => {
                let queries = self.selector().select(&query.kind, QueryClass::Edge);
                ctx.run(self.adapter.edge_metrics(
                    &obj,
                    interval,
                    details,
                    queries,
                    labels::edge_partner,
                ))
                .await
            }
            Err(err) => Err(err),
        };

        if let Ok(list) = &result {
            for (index, item) in list.items.iter().enumerate() {
                if item.edge.is_none() {
                    self.logger.log_missing_partner(&obj, index);
                }
            }
        }

        self.finish(operations::EDGE_METRICS, &obj, started, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::QueryTemplates;
    use crate::config::Queries;
    use crate::labels::{partner_prefix, EdgeMapper, ResourceMapper, SeriesLabels};
    use crate::models::{Edge, EdgeDirection, Metric, ResourceKind, TrafficMetrics};
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// What the adapter was asked to do
    #[derive(Debug, Clone)]
    struct Call {
        obj: ObjectReference,
        interval: Interval,
        details: Option<ResourceDetails>,
        queries: QueryTemplates,
    }

    /// Adapter that records calls and answers with a canned response
    struct RecordingAdapter {
        calls: Mutex<Vec<Call>>,
        failure: Option<MetricsError>,
        hang: bool,
    }

    impl RecordingAdapter {
        fn ok() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                failure: None,
                hang: false,
            }
        }

        fn failing(err: MetricsError) -> Self {
            Self {
                failure: Some(err),
                ..Self::ok()
            }
        }

        fn hanging() -> Self {
            Self {
                hang: true,
                ..Self::ok()
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        async fn respond(&self, call: Call) -> Result<Vec<String>, MetricsError> {
            let mut names: Vec<_> = call.queries.keys().cloned().collect();
            names.sort();
            self.calls.lock().unwrap().push(call);

            if self.hang {
                std::future::pending::<()>().await;
            }
            if let Some(err) = &self.failure {
                return Err(err.clone());
            }
            Ok(names)
        }
    }

    /// Workloads the fake backend reports traffic for
    const PARTNERS: [&str; 2] = ["cart", "payments"];

    fn series(pairs: &[(String, &str)]) -> SeriesLabels {
        pairs
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect()
    }

    #[async_trait]
    impl MetricsAdapter for RecordingAdapter {
        async fn resource_metrics(
            &self,
            obj: &ObjectReference,
            interval: &Interval,
            queries: &QueryTemplates,
            mapper: ResourceMapper,
        ) -> Result<TrafficMetricsList, MetricsError> {
            let names = self
                .respond(Call {
                    obj: obj.clone(),
                    interval: interval.clone(),
                    details: None,
                    queries: queries.clone(),
                })
                .await?;

            let workloads = match obj.name.as_deref() {
                Some(name) => vec![name],
                None => PARTNERS.to_vec(),
            };

            let mut list = TrafficMetricsList::new(obj.clone());
            for workload in workloads {
                let labels = series(&[
                    ("destination_workload".to_string(), workload),
                    ("destination_workload_namespace".to_string(), obj.namespace.as_str()),
                    ("pod".to_string(), workload),
                ]);
                let resource = mapper(obj, &labels).unwrap_or_else(|| obj.clone());
                let mut record = TrafficMetrics::for_interval(resource, interval);
                record.metrics = names.iter().map(|n| Metric::new(n, Some(1.0))).collect();
                list.items.push(record);
            }
            Ok(list)
        }

        async fn edge_metrics(
            &self,
            obj: &ObjectReference,
            interval: &Interval,
            details: &ResourceDetails,
            queries: &QueryTemplates,
            mapper: EdgeMapper,
        ) -> Result<TrafficMetricsList, MetricsError> {
            let names = self
                .respond(Call {
                    obj: obj.clone(),
                    interval: interval.clone(),
                    details: Some(details.clone()),
                    queries: queries.clone(),
                })
                .await?;

            let prefix = partner_prefix(details.direction);
            let mut list = TrafficMetricsList::new(obj.clone());
            for partner in PARTNERS {
                let labels = series(&[
                    (format!("{}_workload", prefix), partner),
                    (format!("{}_workload_namespace", prefix), obj.namespace.as_str()),
                    (format!("{}_pod", prefix), partner),
                ]);
                let mut record = TrafficMetrics::for_interval(obj.clone(), interval);
                record.edge = mapper(obj, details, &labels);
                record.metrics = names.iter().map(|n| Metric::new(n, Some(2.0))).collect();
                list.items.push(record);
            }
            Ok(list)
        }
    }

    fn queries(prefix: &str) -> Queries {
        Queries {
            resource_queries: HashMap::from([
                ("success_count".to_string(), format!("{}-resource-success", prefix)),
                ("p99_response_latency".to_string(), format!("{}-resource-p99", prefix)),
            ]),
            edge_queries: HashMap::from([(
                "success_count".to_string(),
                format!("{}-edge-success", prefix),
            )]),
        }
    }

    fn test_config() -> ProviderConfig {
        ProviderConfig {
            prometheus_url: "http://prometheus.istio-system:9090".to_string(),
            namespace_queries: queries("namespace"),
            pod_queries: queries("pod"),
            workload_queries: queries("workload"),
        }
    }

    fn test_interval() -> Interval {
        let end = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        Interval::ending_at(end, Duration::from_secs(30)).unwrap()
    }

    fn provider(adapter: RecordingAdapter) -> IstioProvider<RecordingAdapter> {
        IstioProvider::with_adapter(test_config(), adapter)
    }

    #[tokio::test]
    async fn test_named_pod_reference_is_passed_unchanged() {
        let provider = provider(RecordingAdapter::ok());
        let query = Query::named(ResourceKind::Pod, "prod", "checkout");

        let list = provider
            .resource_metrics(&RequestContext::background(), &query, &test_interval())
            .await
            .unwrap();

        let calls = provider.adapter().calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].obj,
            ObjectReference::new("Pod", "prod", Some("checkout".to_string()))
        );
        assert_eq!(calls[0].interval, test_interval());
        assert_eq!(calls[0].queries, test_config().pod_queries.resource_queries);
        assert_eq!(list.items.len(), 1);
        assert_eq!(list.items[0].metrics.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_name_aggregates_over_namespace() {
        let provider = provider(RecordingAdapter::ok());
        let query = Query::named(ResourceKind::Namespace, "prod", "");

        provider
            .resource_metrics(&RequestContext::background(), &query, &test_interval())
            .await
            .unwrap();

        let calls = provider.adapter().calls();
        assert_eq!(calls[0].obj.kind, "Namespace");
        assert_eq!(calls[0].obj.namespace, "prod");
        assert_eq!(calls[0].obj.name, None);
        assert_eq!(calls[0].queries, test_config().namespace_queries.resource_queries);
    }

    #[tokio::test]
    async fn test_unrecognized_kind_uses_workload_queries() {
        let provider = provider(RecordingAdapter::ok());
        let query = Query::named(ResourceKind::from_kind_name("Widget"), "prod", "w-1");

        provider
            .resource_metrics(&RequestContext::background(), &query, &test_interval())
            .await
            .unwrap();

        let calls = provider.adapter().calls();
        assert_eq!(calls[0].obj.kind, "Widget");
        assert_eq!(calls[0].queries, test_config().workload_queries.resource_queries);
    }

    #[tokio::test]
    async fn test_edge_details_passed_through_and_partners_populated() {
        let provider = provider(RecordingAdapter::ok());
        let query = Query::named(ResourceKind::Workload("Deployment".into()), "prod", "checkout");
        let mut details = ResourceDetails::new(EdgeDirection::To);
        details.partner_kind = Some("Pod".to_string());
        details
            .selector
            .insert("app".to_string(), "cart".to_string());

        let list = provider
            .edge_metrics(&RequestContext::background(), &query, &test_interval(), &details)
            .await
            .unwrap();

        let calls = provider.adapter().calls();
        assert_eq!(calls[0].details.as_ref(), Some(&details));
        assert_eq!(calls[0].queries, test_config().workload_queries.edge_queries);

        let partners: Vec<_> = list
            .items
            .iter()
            .map(|item| item.edge.clone().expect("partner must be set"))
            .collect();
        assert_eq!(
            partners,
            vec![
                Edge {
                    direction: EdgeDirection::To,
                    resource: ObjectReference::new("Pod", "prod", Some("cart".to_string())),
                },
                Edge {
                    direction: EdgeDirection::To,
                    resource: ObjectReference::new("Pod", "prod", Some("payments".to_string())),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_edge_partners_follow_direction_labels() {
        let provider = provider(RecordingAdapter::ok());
        let query = Query::named(ResourceKind::Workload("Deployment".into()), "prod", "checkout");

        let list = provider
            .edge_metrics(
                &RequestContext::background(),
                &query,
                &test_interval(),
                &ResourceDetails::new(EdgeDirection::From),
            )
            .await
            .unwrap();

        let edge = list.items[0].edge.as_ref().unwrap();
        assert_eq!(edge.direction, EdgeDirection::From);
        assert_eq!(
            edge.resource,
            ObjectReference::new("Deployment", "prod", Some("cart".to_string()))
        );
    }

    #[tokio::test]
    async fn test_aggregate_records_are_attributed_from_labels() {
        let provider = provider(RecordingAdapter::ok());
        let query = Query::new(ResourceKind::Pod, "prod");

        let list = provider
            .resource_metrics(&RequestContext::background(), &query, &test_interval())
            .await
            .unwrap();

        assert_eq!(list.resource, ObjectReference::new("Pod", "prod", None));
        let resources: Vec<_> = list.items.iter().map(|item| item.resource.clone()).collect();
        assert_eq!(
            resources,
            vec![
                ObjectReference::new("Pod", "prod", Some("cart".to_string())),
                ObjectReference::new("Pod", "prod", Some("payments".to_string())),
            ]
        );
    }

    #[tokio::test]
    async fn test_adapter_failure_is_propagated_verbatim() {
        let err = MetricsError::QueryRejected {
            query: "pod-resource-success".to_string(),
            message: "bad_data: parse error at char 4".to_string(),
        };
        let provider = provider(RecordingAdapter::failing(err.clone()));
        let query = Query::named(ResourceKind::Pod, "prod", "checkout");

        let result = provider
            .resource_metrics(&RequestContext::background(), &query, &test_interval())
            .await;
        assert_eq!(result, Err(err.clone()));

        let result = provider
            .edge_metrics(
                &RequestContext::background(),
                &query,
                &test_interval(),
                &ResourceDetails::default(),
            )
            .await;
        assert_eq!(result, Err(err));
    }

    #[tokio::test]
    async fn test_empty_namespace_is_rejected_before_adapter() {
        let provider = provider(RecordingAdapter::ok());
        let query = Query::named(ResourceKind::Pod, "", "checkout");

        let result = provider
            .resource_metrics(&RequestContext::background(), &query, &test_interval())
            .await;

        assert!(matches!(result, Err(MetricsError::InvalidQuery(_))));
        assert!(provider.adapter().calls().is_empty());
    }

    #[tokio::test]
    async fn test_edge_query_requires_name() {
        let provider = provider(RecordingAdapter::ok());
        let query = Query::new(ResourceKind::Pod, "prod");

        let result = provider
            .edge_metrics(
                &RequestContext::background(),
                &query,
                &test_interval(),
                &ResourceDetails::default(),
            )
            .await;

        assert!(matches!(result, Err(MetricsError::InvalidQuery(_))));
        assert!(provider.adapter().calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_aborts_adapter_call() {
        let provider = Arc::new(provider(RecordingAdapter::hanging()));
        let ctx = RequestContext::background();
        let canceller = ctx.clone();

        let task = {
            let provider = provider.clone();
            tokio::spawn(async move {
                let query = Query::named(ResourceKind::Pod, "prod", "checkout");
                provider
                    .resource_metrics(&ctx, &query, &test_interval())
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        canceller.cancel();

        let result = task.await.unwrap();
        assert_eq!(result, Err(MetricsError::Cancelled));
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_provider() {
        let provider = Arc::new(provider(RecordingAdapter::ok()));

        let handles: Vec<_> = ["a", "b", "c", "d"]
            .into_iter()
            .map(|name| {
                let provider = provider.clone();
                tokio::spawn(async move {
                    let query = Query::named(ResourceKind::Pod, "prod", name);
                    provider
                        .resource_metrics(&RequestContext::background(), &query, &test_interval())
                        .await
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(provider.adapter().calls().len(), 4);
    }

    #[tokio::test]
    async fn test_supported_resources_ignores_config() {
        let provider = IstioProvider::with_adapter(ProviderConfig::default(), RecordingAdapter::ok());
        let ctx = RequestContext::background();

        let first = provider.supported_resources(&ctx).await.unwrap();
        let second = provider.supported_resources(&ctx).await.unwrap();

        assert!(!first.resources.is_empty());
        assert_eq!(first, second);
        assert_eq!(first, registry::supported_resources());
    }

    #[test]
    fn test_new_connects_adapter_with_backend_url() {
        let provider = IstioProvider::new(test_config(), |url| {
            assert_eq!(url.host_str(), Some("prometheus.istio-system"));
            assert_eq!(url.port(), Some(9090));
            Ok(RecordingAdapter::ok())
        })
        .unwrap();

        assert!(provider.backend_url().is_some());
    }

    #[test]
    fn test_new_rejects_invalid_backend_address() {
        let mut config = test_config();
        config.prometheus_url = "not a url".to_string();

        let result = IstioProvider::new(config, |_| -> Result<RecordingAdapter, MetricsError> {
            panic!("adapter must not be built for an invalid address")
        });
        assert!(matches!(
            result.err(),
            Some(MetricsError::InvalidBackendAddress { .. })
        ));

        let mut config = test_config();
        config.prometheus_url = "ftp://prometheus:9090".to_string();
        let result = IstioProvider::new(config, |_| Ok(RecordingAdapter::ok()));
        assert!(matches!(
            result.err(),
            Some(MetricsError::UnsupportedBackendScheme { .. })
        ));
    }

    /// Log output collected from a test subscriber
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    fn startup_logs<T>(build: impl FnOnce() -> T) -> String {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let _ = tracing::subscriber::with_default(subscriber, build);
        logs.contents()
    }

    #[test]
    fn test_every_constructor_logs_startup() {
        let logs = startup_logs(|| IstioProvider::with_adapter(test_config(), RecordingAdapter::ok()));
        assert!(logs.contains("provider_started"));
        assert!(logs.contains("http://prometheus.istio-system:9090"));

        let logs = startup_logs(|| IstioProvider::new(test_config(), |_| Ok(RecordingAdapter::ok())));
        assert!(logs.contains("provider_started"));
    }

    #[test]
    fn test_new_returns_connect_error() {
        let err = MetricsError::BackendUnavailable("dns lookup failed".to_string());
        let result = IstioProvider::<RecordingAdapter>::new(test_config(), |_| Err(err.clone()));
        assert_eq!(result.err(), Some(err));
    }
}
