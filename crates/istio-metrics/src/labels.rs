//! Istio series labels to object references
//!
//! Istio's standard metrics identify the two ends of a request with
//! `source_*` and `destination_*` labels. A resource-level series
//! describes its destination; an edge series names the partner on the
//! side given by the edge direction.

use crate::models::{Edge, EdgeDirection, ObjectReference, ResourceDetails, ResourceKind};
use std::collections::BTreeMap;

/// Label set of one series returned by the metrics backend
pub type SeriesLabels = BTreeMap<String, String>;

/// Maps a resource-level series to the resource it describes
pub type ResourceMapper = fn(&ObjectReference, &SeriesLabels) -> Option<ObjectReference>;

/// Maps an edge series to the partner at the other end
pub type EdgeMapper = fn(&ObjectReference, &ResourceDetails, &SeriesLabels) -> Option<Edge>;

/// Label holding the pod name on resource-level series
pub const POD_LABEL: &str = "pod";

const SOURCE: &str = "source";
const DESTINATION: &str = "destination";

/// Label prefix naming the partner for `direction`
pub fn partner_prefix(direction: EdgeDirection) -> &'static str {
    match direction {
        EdgeDirection::From => SOURCE,
        EdgeDirection::To => DESTINATION,
    }
}

fn label<'a>(labels: &'a SeriesLabels, key: &str) -> Option<&'a str> {
    labels
        .get(key)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

/// Build the reference of a `kind` object from the labels under `prefix`
///
/// `pod_label` names the label holding pod names, which Istio does not
/// prefix on resource-level series.
fn reference(
    kind: &ResourceKind,
    labels: &SeriesLabels,
    prefix: &str,
    pod_label: &str,
    fallback_namespace: &str,
) -> Option<ObjectReference> {
    let namespace = label(labels, &format!("{}_workload_namespace", prefix));

    let (namespace, name) = match kind {
        ResourceKind::Namespace => {
            let namespace = namespace?;
            (namespace, namespace)
        }
        ResourceKind::Pod => (
            namespace.unwrap_or(fallback_namespace),
            label(labels, pod_label)?,
        ),
        ResourceKind::Workload(_) => (
            namespace.unwrap_or(fallback_namespace),
            label(labels, &format!("{}_workload", prefix))?,
        ),
    };

    Some(ObjectReference::new(
        kind.name(),
        namespace,
        Some(name.to_string()),
    ))
}

/// Resource described by a resource-level series for `obj`
///
/// Returns `None` when the labels do not name an object of `obj`'s kind.
pub fn resource_reference(obj: &ObjectReference, labels: &SeriesLabels) -> Option<ObjectReference> {
    let kind = ResourceKind::from_kind_name(&obj.kind);
    reference(&kind, labels, DESTINATION, POD_LABEL, &obj.namespace)
}

/// Partner of `obj` on an edge series
///
/// The partner kind is `details.partner_kind` when given, otherwise the
/// kind of `obj`. Returns `None` when the labels do not name a partner.
pub fn edge_partner(
    obj: &ObjectReference,
    details: &ResourceDetails,
    labels: &SeriesLabels,
) -> Option<Edge> {
    let kind = ResourceKind::from_kind_name(details.partner_kind.as_deref().unwrap_or(&obj.kind));
    let prefix = partner_prefix(details.direction);
    let fallback_namespace = details
        .partner_namespace
        .as_deref()
        .unwrap_or(&obj.namespace);

    let resource = reference(
        &kind,
        labels,
        prefix,
        &format!("{}_{}", prefix, POD_LABEL),
        fallback_namespace,
    )?;

    Some(Edge {
        direction: details.direction,
        resource,
    })
}
