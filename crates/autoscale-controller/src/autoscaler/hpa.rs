//! HorizontalPodAutoscaler construction and comparison.

use k8s_openapi::api::autoscaling::v2::CrossVersionObjectReference;
use k8s_openapi::api::autoscaling::v2::ExternalMetricSource;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscalerSpec;
use k8s_openapi::api::autoscaling::v2::MetricIdentifier;
use k8s_openapi::api::autoscaling::v2::MetricSpec;
use k8s_openapi::api::autoscaling::v2::MetricTarget;
use k8s_openapi::api::autoscaling::v2::ResourceMetricSource;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use super::desired_metadata;
use super::AutoscalerKind;
use super::ManagedAutoscaler;
use crate::annotations::int_value;
use crate::annotations::quantity_value;
use crate::annotations::Annotations;
use crate::annotations::HPA_CPU_TARGET_UTILIZATION;
use crate::annotations::HPA_CPU_TARGET_VALUE;
use crate::annotations::HPA_MAX_REPLICAS;
use crate::annotations::HPA_MEMORY_TARGET_UTILIZATION;
use crate::annotations::HPA_MEMORY_TARGET_VALUE;
use crate::annotations::HPA_MIN_REPLICAS;
use crate::workload::Workload;
use crate::workload::WorkloadKind;
use crate::workload::APPS_API_VERSION;

const RESOURCE_METRIC: &str = "Resource";
const EXTERNAL_METRIC: &str = "External";
const UTILIZATION_TARGET: &str = "Utilization";
const AVERAGE_VALUE_TARGET: &str = "AverageValue";

const CPU: &str = "cpu";
const MEMORY: &str = "memory";

fn resource_metric(resource: &str, target: MetricTarget) -> MetricSpec {
    MetricSpec {
        type_: RESOURCE_METRIC.to_string(),
        resource: Some(ResourceMetricSource {
            name: resource.to_string(),
            target,
        }),
        ..Default::default()
    }
}

fn utilization(percent: i32) -> MetricTarget {
    MetricTarget {
        type_: UTILIZATION_TARGET.to_string(),
        average_utilization: Some(percent),
        ..Default::default()
    }
}

fn average_value(quantity: Quantity) -> MetricTarget {
    MetricTarget {
        type_: AVERAGE_VALUE_TARGET.to_string(),
        average_value: Some(quantity),
        ..Default::default()
    }
}

pub fn cpu_utilization_metric(percent: i32) -> MetricSpec {
    resource_metric(CPU, utilization(percent))
}

pub fn cpu_value_metric(quantity: Quantity) -> MetricSpec {
    resource_metric(CPU, average_value(quantity))
}

pub fn memory_utilization_metric(percent: i32) -> MetricSpec {
    resource_metric(MEMORY, utilization(percent))
}

pub fn memory_value_metric(quantity: Quantity) -> MetricSpec {
    resource_metric(MEMORY, average_value(quantity))
}

/// Metric driven by a series from an external metrics provider, targeting an
/// average value per pod.
pub fn external_metric(name: &str, quantity: Quantity) -> MetricSpec {
    MetricSpec {
        type_: EXTERNAL_METRIC.to_string(),
        external: Some(ExternalMetricSource {
            metric: MetricIdentifier {
                name: name.to_string(),
                selector: None,
            },
            target: average_value(quantity),
        }),
        ..Default::default()
    }
}

/// Translates workload annotations into an HPA spec.
///
/// Malformed values are left out instead of failing the build. An unset or
/// malformed `maxReplicas` leaves the bound at zero.
pub fn build_desired_spec(
    annotations: &Annotations,
    kind: WorkloadKind,
    name: &str,
) -> HorizontalPodAutoscalerSpec {
    let mut metrics = Vec::new();
    if let Some(percent) = int_value(annotations, HPA_CPU_TARGET_UTILIZATION) {
        metrics.push(cpu_utilization_metric(percent));
    }
    if let Some(quantity) = quantity_value(annotations, HPA_CPU_TARGET_VALUE) {
        metrics.push(cpu_value_metric(quantity));
    }
    if let Some(percent) = int_value(annotations, HPA_MEMORY_TARGET_UTILIZATION) {
        metrics.push(memory_utilization_metric(percent));
    }
    if let Some(quantity) = quantity_value(annotations, HPA_MEMORY_TARGET_VALUE) {
        metrics.push(memory_value_metric(quantity));
    }

    HorizontalPodAutoscalerSpec {
        scale_target_ref: CrossVersionObjectReference {
            api_version: Some(APPS_API_VERSION.to_string()),
            kind: kind.to_string(),
            name: name.to_string(),
        },
        min_replicas: int_value(annotations, HPA_MIN_REPLICAS),
        max_replicas: int_value(annotations, HPA_MAX_REPLICAS).unwrap_or_default(),
        metrics: Some(metrics),
        behavior: None,
    }
}

pub fn build_desired_hpa(workload: &Workload) -> HorizontalPodAutoscaler {
    HorizontalPodAutoscaler {
        metadata: desired_metadata(workload),
        spec: Some(build_desired_spec(
            &workload.annotations(),
            workload.kind(),
            workload.name(),
        )),
        status: None,
    }
}

/// Name of the thing a metric observes, whichever source it uses.
fn metric_source_name(metric: &MetricSpec) -> Option<&str> {
    if let Some(resource) = &metric.resource {
        return Some(&resource.name);
    }
    if let Some(container) = &metric.container_resource {
        return Some(&container.name);
    }
    [
        metric.external.as_ref().map(|m| &m.metric),
        metric.pods.as_ref().map(|m| &m.metric),
        metric.object.as_ref().map(|m| &m.metric),
    ]
    .into_iter()
    .flatten()
    .next()
    .map(|identifier| identifier.name.as_str())
}

/// Metrics compare by type and source name only; targets are ignored.
fn equal_metrics(a: &[MetricSpec], b: &[MetricSpec]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(a, b)| {
            a.type_ == b.type_ && metric_source_name(a) == metric_source_name(b)
        })
}

/// Decides whether `current` needs a rewrite to reach `desired`.
///
/// Compares the scale target, metric identities and replica bounds. Metric
/// thresholds are not compared, so a changed target percentage alone does not
/// trigger an update.
pub fn equal_hpa(current: &HorizontalPodAutoscaler, desired: &HorizontalPodAutoscaler) -> bool {
    let default = HorizontalPodAutoscalerSpec::default();
    let a = current.spec.as_ref().unwrap_or(&default);
    let b = desired.spec.as_ref().unwrap_or(&default);

    a.scale_target_ref == b.scale_target_ref
        && equal_metrics(
            a.metrics.as_deref().unwrap_or_default(),
            b.metrics.as_deref().unwrap_or_default(),
        )
        && a.min_replicas == b.min_replicas
        && a.max_replicas == b.max_replicas
}

impl ManagedAutoscaler for HorizontalPodAutoscaler {
    const KIND: AutoscalerKind = AutoscalerKind::Horizontal;

    fn matches(&self, desired: &Self) -> bool {
        equal_hpa(self, desired)
    }

    fn adopt_spec(&mut self, desired: Self) {
        self.spec = desired.spec;
    }
}
