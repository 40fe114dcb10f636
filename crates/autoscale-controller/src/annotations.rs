//! Annotation keys recognized on workloads and their value grammars.

use std::collections::BTreeMap;

use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Prefix shared by every horizontal autoscaler annotation.
pub const HPA_PREFIX: &str = "hpa.infraflow.co/";
/// Prefix shared by every vertical autoscaler annotation.
pub const VPA_PREFIX: &str = "vpa.infraflow.co/";

pub const HPA_MIN_REPLICAS: &str = "hpa.infraflow.co/minReplicas";
pub const HPA_MAX_REPLICAS: &str = "hpa.infraflow.co/maxReplicas";
pub const HPA_CPU_TARGET_UTILIZATION: &str = "hpa.infraflow.co/cpu.targetAverageUtilization";
pub const HPA_CPU_TARGET_VALUE: &str = "hpa.infraflow.co/cpu.targetAverageValue";
pub const HPA_MEMORY_TARGET_UTILIZATION: &str =
    "hpa.infraflow.co/memory.targetAverageUtilization";
pub const HPA_MEMORY_TARGET_VALUE: &str = "hpa.infraflow.co/memory.targetAverageValue";

pub const VPA_UPDATE_MODE: &str = "vpa.infraflow.co/updateMode";
pub const VPA_RESOURCE_POLICY: &str = "vpa.infraflow.co/resourcePolicy";
pub const VPA_CONTAINER_POLICIES: &str = "vpa.infraflow.co/containerPolicies";
pub const VPA_CPU_MIN_ALLOWED: &str = "vpa.infraflow.co/cpu.minAllowed";
pub const VPA_CPU_MAX_ALLOWED: &str = "vpa.infraflow.co/cpu.maxAllowed";
pub const VPA_MEMORY_MIN_ALLOWED: &str = "vpa.infraflow.co/memory.minAllowed";
pub const VPA_MEMORY_MAX_ALLOWED: &str = "vpa.infraflow.co/memory.maxAllowed";

/// Finalizer placed on every managed workload.
pub const AUTOSCALE_FINALIZER: &str = "finalizers.infraflow.co/autoscale";

pub type Annotations = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("annotation {key} is not an integer: {value:?}")]
    NotAnInteger { key: String, value: String },
    #[error("annotation {key} is not a resource quantity: {value:?}")]
    NotAQuantity { key: String, value: String },
    #[error("annotation {key} is not valid JSON for the expected shape")]
    MalformedJson { key: String },
}

/// Any key under [`HPA_PREFIX`] turns horizontal management on.
pub fn manages_hpa(annotations: &Annotations) -> bool {
    has_prefix(annotations, HPA_PREFIX)
}

/// Any key under [`VPA_PREFIX`] turns vertical management on.
pub fn manages_vpa(annotations: &Annotations) -> bool {
    has_prefix(annotations, VPA_PREFIX)
}

fn has_prefix(annotations: &Annotations, prefix: &str) -> bool {
    annotations.keys().any(|key| key.starts_with(prefix))
}

/// Best-effort lookup: missing keys and malformed values both yield `None`.
/// Malformed values are logged at debug level.
fn lookup<T>(
    annotations: &Annotations,
    key: &str,
    parse: impl FnOnce(&str, &str) -> Result<T, Report<AnnotationError>>,
) -> Option<T> {
    let value = annotations.get(key)?;
    match parse(key, value) {
        Ok(parsed) => Some(parsed),
        Err(report) => {
            tracing::debug!(key, value = %value, error = ?report, "ignoring malformed annotation");
            None
        }
    }
}

pub fn int_value(annotations: &Annotations, key: &str) -> Option<i32> {
    lookup(annotations, key, parse_int)
}

pub fn quantity_value(annotations: &Annotations, key: &str) -> Option<Quantity> {
    lookup(annotations, key, |key, value| {
        parse_quantity(value).ok_or_else(|| {
            Report::new(AnnotationError::NotAQuantity {
                key: key.to_string(),
                value: value.to_string(),
            })
        })
    })
}

pub fn json_value<T: DeserializeOwned>(annotations: &Annotations, key: &str) -> Option<T> {
    lookup(annotations, key, |key, value| {
        serde_json::from_str(value).change_context(AnnotationError::MalformedJson {
            key: key.to_string(),
        })
    })
}

fn parse_int(key: &str, value: &str) -> Result<i32, Report<AnnotationError>> {
    value
        .parse::<i32>()
        .change_context_lazy(|| AnnotationError::NotAnInteger {
            key: key.to_string(),
            value: value.to_string(),
        })
}

const QUANTITY_SUFFIXES: &[&str] = &[
    "", "n", "u", "m", "k", "M", "G", "T", "P", "E", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei",
];

/// Validates `value` against the Kubernetes quantity grammar:
/// an optionally signed decimal number followed by a decimal SI suffix, a
/// binary SI suffix, or an `e`/`E` exponent.
pub fn parse_quantity(value: &str) -> Option<Quantity> {
    let unsigned = value.strip_prefix(['+', '-']).unwrap_or(value);
    let number_len = unsigned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(unsigned.len());
    let (number, suffix) = unsigned.split_at(number_len);

    let mut parts = number.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let fraction = parts.next();
    if fraction.is_some_and(|f| f.contains('.')) || whole.len() + fraction.map_or(0, str::len) == 0
    {
        return None;
    }

    let valid_suffix = QUANTITY_SUFFIXES.contains(&suffix)
        || suffix
            .strip_prefix(['e', 'E'])
            .map(|exp| exp.strip_prefix(['+', '-']).unwrap_or(exp))
            .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()));

    valid_suffix.then(|| Quantity(value.to_string()))
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn annotations(pairs: &[(&str, &str)]) -> Annotations {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn prefixes_gate_management() {
        let horizontal = annotations(&[(HPA_MAX_REPLICAS, "5")]);
        let vertical = annotations(&[(VPA_UPDATE_MODE, "Off")]);
        let unrelated = annotations(&[("hpa.example.com/maxReplicas", "5")]);

        assert!(manages_hpa(&horizontal) && !manages_vpa(&horizontal));
        assert!(manages_vpa(&vertical) && !manages_hpa(&vertical));
        assert!(!manages_hpa(&unrelated) && !manages_vpa(&unrelated));
    }

    #[test]
    fn accepts_kubernetes_quantities() {
        for value in [
            "500m", "500n", "250u", "512Mi", "1", "1.5Gi", ".5", "2.", "+3k", "-1", "1e3", "1E-2",
        ] {
            assert_eq!(
                parse_quantity(value).map(|q| q.0),
                Some(value.to_string()),
                "{value}"
            );
        }
    }

    #[test]
    fn rejects_malformed_quantities() {
        for value in ["", "abc", "500x", "1..2", "Mi", " 500m", "1e", "1.2.3", "."] {
            assert!(parse_quantity(value).is_none(), "{value}");
        }
    }

    #[test]
    fn malformed_values_are_dropped() {
        let map = annotations(&[
            (HPA_MIN_REPLICAS, "two"),
            (HPA_MAX_REPLICAS, "10"),
            (HPA_CPU_TARGET_VALUE, "lots"),
            (VPA_RESOURCE_POLICY, "{not json"),
        ]);

        assert_eq!(int_value(&map, HPA_MIN_REPLICAS), None);
        assert_eq!(int_value(&map, HPA_MAX_REPLICAS), Some(10));
        assert_eq!(quantity_value(&map, HPA_CPU_TARGET_VALUE), None);
        assert_eq!(json_value::<serde_json::Value>(&map, VPA_RESOURCE_POLICY), None);
    }
}
