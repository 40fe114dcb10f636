//! VerticalPodAutoscaler resource (`autoscaling.k8s.io/v1`), its construction
//! and comparison.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use error_stack::Report;
use k8s_openapi::api::autoscaling::v1::CrossVersionObjectReference;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::NamespaceResourceScope;
use serde::Deserialize;
use serde::Serialize;

use super::desired_metadata;
use super::AutoscalerKind;
use super::ManagedAutoscaler;
use crate::annotations::json_value;
use crate::annotations::quantity_value;
use crate::annotations::Annotations;
use crate::annotations::VPA_CONTAINER_POLICIES;
use crate::annotations::VPA_CPU_MAX_ALLOWED;
use crate::annotations::VPA_CPU_MIN_ALLOWED;
use crate::annotations::VPA_MEMORY_MAX_ALLOWED;
use crate::annotations::VPA_MEMORY_MIN_ALLOWED;
use crate::annotations::VPA_RESOURCE_POLICY;
use crate::annotations::VPA_UPDATE_MODE;
use crate::error::ReconcileError;
use crate::error::ReconcileResult;
use crate::workload::Workload;
use crate::workload::WorkloadKind;
use crate::workload::APPS_API_VERSION;

const GROUP: &str = "autoscaling.k8s.io";
const VERSION: &str = "v1";
const KIND: &str = "VerticalPodAutoscaler";
const PLURAL: &str = "verticalpodautoscalers";

/// Container name matching every container of the target pods.
pub const ALL_CONTAINERS: &str = "*";

fn default_api_version() -> String {
    format!("{GROUP}/{VERSION}")
}

fn default_kind() -> String {
    KIND.to_string()
}

/// VerticalPodAutoscaler custom resource.
///
/// k8s-openapi does not ship the type, so it is modelled here with only the
/// fields the controller reads or writes. `status` is kept opaque.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerticalPodAutoscaler {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: VerticalPodAutoscalerSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<serde_json::Value>,
}

impl Default for VerticalPodAutoscaler {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta::default(),
            spec: VerticalPodAutoscalerSpec::default(),
            status: None,
        }
    }
}

impl kube::Resource for VerticalPodAutoscaler {
    type DynamicType = ();
    type Scope = NamespaceResourceScope;

    fn group(_dt: &()) -> Cow<'_, str> {
        GROUP.into()
    }

    fn version(_dt: &()) -> Cow<'_, str> {
        VERSION.into()
    }

    fn kind(_dt: &()) -> Cow<'_, str> {
        KIND.into()
    }

    fn plural(_dt: &()) -> Cow<'_, str> {
        PLURAL.into()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerticalPodAutoscalerSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_ref: Option<CrossVersionObjectReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_policy: Option<PodUpdatePolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_policy: Option<PodResourcePolicy>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodUpdatePolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodResourcePolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_policies: Option<Vec<ContainerResourcePolicy>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerResourcePolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_allowed: Option<BTreeMap<String, Quantity>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_allowed: Option<BTreeMap<String, Quantity>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controlled_resources: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controlled_values: Option<String>,
}

/// Update modes accepted in the `updateMode` annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    #[default]
    Auto,
    Initial,
    Off,
}

impl UpdateMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "Auto",
            Self::Initial => "Initial",
            Self::Off => "Off",
        }
    }
}

impl fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateMode {
    type Err = ReconcileError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Auto" => Ok(Self::Auto),
            "Initial" => Ok(Self::Initial),
            "Off" => Ok(Self::Off),
            other => Err(ReconcileError::invalid_configuration(format!(
                "invalid update mode {other:?}, must be one of Auto, Initial, Off"
            ))),
        }
    }
}

/// Wildcard container policy from the `{cpu,memory}.{min,max}Allowed` keys.
fn bounds_policy(annotations: &Annotations) -> Option<PodResourcePolicy> {
    let bounds = |cpu_key: &str, memory_key: &str| {
        let map: BTreeMap<String, Quantity> = [
            ("cpu", quantity_value(annotations, cpu_key)),
            ("memory", quantity_value(annotations, memory_key)),
        ]
        .into_iter()
        .filter_map(|(resource, quantity)| Some((resource.to_string(), quantity?)))
        .collect();
        (!map.is_empty()).then_some(map)
    };

    let min_allowed = bounds(VPA_CPU_MIN_ALLOWED, VPA_MEMORY_MIN_ALLOWED);
    let max_allowed = bounds(VPA_CPU_MAX_ALLOWED, VPA_MEMORY_MAX_ALLOWED);
    if min_allowed.is_none() && max_allowed.is_none() {
        return None;
    }

    Some(PodResourcePolicy {
        container_policies: Some(vec![ContainerResourcePolicy {
            container_name: Some(ALL_CONTAINERS.to_string()),
            min_allowed,
            max_allowed,
            ..Default::default()
        }]),
    })
}

/// Resolves the resource policy. A full `resourcePolicy` wins over
/// `containerPolicies`, which wins over the per-resource bounds.
fn resource_policy(annotations: &Annotations) -> Option<PodResourcePolicy> {
    json_value::<PodResourcePolicy>(annotations, VPA_RESOURCE_POLICY)
        .or_else(|| {
            json_value::<Vec<ContainerResourcePolicy>>(annotations, VPA_CONTAINER_POLICIES).map(
                |policies| PodResourcePolicy {
                    container_policies: Some(policies),
                },
            )
        })
        .or_else(|| bounds_policy(annotations))
}

/// Translates workload annotations into a VPA spec.
///
/// # Errors
///
/// - [`ReconcileError::InvalidConfiguration`] if `updateMode` is not one of
///   `Auto`, `Initial` or `Off`
pub fn build_desired_spec(
    annotations: &Annotations,
    kind: WorkloadKind,
    name: &str,
) -> ReconcileResult<VerticalPodAutoscalerSpec> {
    let mode = match annotations.get(VPA_UPDATE_MODE) {
        Some(value) => value
            .parse::<UpdateMode>()
            .map_err(|e| Report::new(e).attach_printable(format!("annotation {VPA_UPDATE_MODE}")))?,
        None => UpdateMode::default(),
    };

    Ok(VerticalPodAutoscalerSpec {
        target_ref: Some(CrossVersionObjectReference {
            api_version: Some(APPS_API_VERSION.to_string()),
            kind: kind.to_string(),
            name: name.to_string(),
        }),
        update_policy: Some(PodUpdatePolicy {
            update_mode: Some(mode.to_string()),
            min_replicas: None,
        }),
        resource_policy: resource_policy(annotations),
    })
}

pub fn build_desired_vpa(workload: &Workload) -> ReconcileResult<VerticalPodAutoscaler> {
    Ok(VerticalPodAutoscaler {
        metadata: desired_metadata(workload),
        spec: build_desired_spec(&workload.annotations(), workload.kind(), workload.name())?,
        ..Default::default()
    })
}

/// Decides whether `current` needs a rewrite to reach `desired`.
///
/// Only the target name and the update mode take part; both must be set on
/// both sides. The resource policy is not compared.
pub fn equal_vpa(current: &VerticalPodAutoscaler, desired: &VerticalPodAutoscaler) -> bool {
    let target_name = |vpa: &VerticalPodAutoscaler| vpa.spec.target_ref.as_ref().map(|r| r.name.clone());
    let mode = |vpa: &VerticalPodAutoscaler| {
        vpa.spec
            .update_policy
            .as_ref()
            .and_then(|policy| policy.update_mode.clone())
    };

    matches!((target_name(current), target_name(desired)), (Some(a), Some(b)) if a == b)
        && matches!((mode(current), mode(desired)), (Some(a), Some(b)) if a == b)
}

impl ManagedAutoscaler for VerticalPodAutoscaler {
    const KIND: AutoscalerKind = AutoscalerKind::Vertical;

    fn matches(&self, desired: &Self) -> bool {
        equal_vpa(self, desired)
    }

    fn adopt_spec(&mut self, desired: Self) {
        self.spec = desired.spec;
    }
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

    fn vpa(spec: VerticalPodAutoscalerSpec) -> VerticalPodAutoscaler {
        VerticalPodAutoscaler {
            spec,
            ..Default::default()
        }
    }

    fn build(pairs: &[(&str, &str)]) -> ReconcileResult<VerticalPodAutoscalerSpec> {
        build_desired_spec(&annotations(pairs), WorkloadKind::Deployment, "web")
    }

    #[test]
    fn explicit_auto_matches_default() {
        let explicit = build(&[(VPA_UPDATE_MODE, "Auto")]).unwrap();
        let absent = build(&[]).unwrap();

        assert_eq!(explicit, absent);
        assert!(equal_vpa(&vpa(explicit), &vpa(absent)));
    }

    #[test]
    fn rejects_unknown_update_mode() {
        let report = build(&[(VPA_UPDATE_MODE, "Bogus")]).unwrap_err();

        assert!(matches!(
            report.current_context(),
            ReconcileError::InvalidConfiguration { .. }
        ));
    }

    #[test]
    fn accepts_every_update_mode() {
        for mode in ["Auto", "Initial", "Off"] {
            let spec = build(&[(VPA_UPDATE_MODE, mode)]).unwrap();
            assert_eq!(
                spec.update_policy.and_then(|p| p.update_mode).as_deref(),
                Some(mode)
            );
        }
    }

    #[test]
    fn parses_resource_policy_json() {
        let spec = build(&[(
            VPA_RESOURCE_POLICY,
            r#"{"containerPolicies":[{"containerName":"app","maxAllowed":{"cpu":"2"}}]}"#,
        )])
        .unwrap();

        let policies = spec
            .resource_policy
            .and_then(|p| p.container_policies)
            .unwrap_or_default();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].container_name.as_deref(), Some("app"));
        assert_eq!(
            policies[0].max_allowed.as_ref().and_then(|m| m.get("cpu")),
            Some(&Quantity("2".to_string()))
        );
    }

    #[test]
    fn malformed_policy_is_ignored() {
        let spec = build(&[(VPA_RESOURCE_POLICY, "{broken")]).unwrap();

        assert_eq!(spec.resource_policy, None);
    }

    #[test]
    fn bounds_build_wildcard_policy() {
        let spec = build(&[
            (VPA_CPU_MIN_ALLOWED, "100m"),
            (VPA_MEMORY_MAX_ALLOWED, "1Gi"),
            (VPA_CPU_MAX_ALLOWED, "nonsense"),
        ])
        .unwrap();

        let expected = PodResourcePolicy {
            container_policies: Some(vec![ContainerResourcePolicy {
                container_name: Some("*".to_string()),
                min_allowed: Some(BTreeMap::from([(
                    "cpu".to_string(),
                    Quantity("100m".to_string()),
                )])),
                max_allowed: Some(BTreeMap::from([(
                    "memory".to_string(),
                    Quantity("1Gi".to_string()),
                )])),
                ..Default::default()
            }]),
        };
        assert_eq!(spec.resource_policy, Some(expected));
    }

    #[test]
    fn resource_policy_takes_precedence() {
        let spec = build(&[
            (VPA_RESOURCE_POLICY, r#"{"containerPolicies":[{"containerName":"app"}]}"#),
            (VPA_CONTAINER_POLICIES, r#"[{"containerName":"sidecar"}]"#),
            (VPA_CPU_MIN_ALLOWED, "100m"),
        ])
        .unwrap();
        let fallback = build(&[
            (VPA_CONTAINER_POLICIES, r#"[{"containerName":"sidecar"}]"#),
            (VPA_CPU_MIN_ALLOWED, "100m"),
        ])
        .unwrap();

        let first_container = |spec: VerticalPodAutoscalerSpec| {
            spec.resource_policy
                .and_then(|p| p.container_policies)
                .and_then(|p| p.into_iter().next())
                .and_then(|p| p.container_name)
        };
        assert_eq!(first_container(spec).as_deref(), Some("app"));
        assert_eq!(first_container(fallback).as_deref(), Some("sidecar"));
    }

    #[test]
    fn comparator_ignores_policy_but_not_mode() {
        let off = build(&[(VPA_UPDATE_MODE, "Off")]).unwrap();
        let auto = build(&[]).unwrap();
        let bounded = build(&[(VPA_CPU_MIN_ALLOWED, "100m")]).unwrap();

        assert!(!equal_vpa(&vpa(off), &vpa(auto.clone())));
        assert!(equal_vpa(&vpa(bounded), &vpa(auto.clone())));
        assert!(!equal_vpa(&vpa(VerticalPodAutoscalerSpec::default()), &vpa(auto)));
    }

    #[test]
    fn serializes_as_custom_resource() {
        let value = serde_json::to_value(VerticalPodAutoscaler::default()).unwrap();

        assert_eq!(value["apiVersion"], "autoscaling.k8s.io/v1");
        assert_eq!(value["kind"], "VerticalPodAutoscaler");
    }
}
