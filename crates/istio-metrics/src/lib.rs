//! Istio traffic-metrics provider
//!
//! This crate provides:
//! - Query template selection per resource kind and query class
//! - Resource and edge metrics handlers on top of a metrics adapter
//! - Mapping of Istio series labels to resources and traffic partners
//! - Discovery of supported metric resource kinds
//! - An HTTP surface for the traffic-metrics API
//! - Provider self-metrics and structured logging

pub mod adapter;
pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod labels;
pub mod models;
pub mod observability;
pub mod provider;
pub mod registry;
pub mod selector;

pub use adapter::{MetricsAdapter, QueryTemplates};
pub use self::config::{ProviderConfig, Queries};
pub use context::RequestContext;
pub use error::MetricsError;
pub use labels::{EdgeMapper, ResourceMapper, SeriesLabels};
pub use models::*;
pub use observability::{ProviderMetrics, StructuredLogger};
pub use provider::{IstioProvider, MetricsProvider};
pub use selector::{QueryClass, QuerySelector};
