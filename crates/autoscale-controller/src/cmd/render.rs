//! Offline preview of the autoscalers the controller would create.

use std::path::Path;

use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::annotations::manages_hpa;
use crate::annotations::manages_vpa;
use crate::autoscaler::hpa::build_desired_hpa;
use crate::autoscaler::vpa::build_desired_vpa;
use crate::config::RenderArgs;
use crate::workload::Workload;
use crate::workload::WorkloadKind;

const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to read manifest {path}")]
    Read { path: String },
    #[error("document {index} is not valid YAML")]
    Parse { index: usize },
    #[error("document {index} is not a valid {kind}")]
    Decode { index: usize, kind: WorkloadKind },
    #[error("cannot render autoscalers for {name}")]
    Build { name: String },
    #[error("failed to serialize autoscaler for {name}")]
    Serialize { name: String },
}

pub fn run(args: &RenderArgs) -> Result<(), Report<RenderError>> {
    let output = render_file(&args.manifest, args.enable_vpa)?;
    print!("{output}");
    Ok(())
}

/// Renders every supported workload in the file at `path`.
pub fn render_file(path: &Path, enable_vpa: bool) -> Result<String, Report<RenderError>> {
    let text = std::fs::read_to_string(path).change_context_lazy(|| RenderError::Read {
        path: path.display().to_string(),
    })?;
    render_manifest(&text, enable_vpa)
}

/// Renders the HPA and VPA documents for each workload in a multi-document
/// YAML string. Documents of other kinds are skipped.
pub fn render_manifest(text: &str, enable_vpa: bool) -> Result<String, Report<RenderError>> {
    let mut rendered = Vec::new();
    for (index, document) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = serde_yaml::Value::deserialize(document)
            .change_context(RenderError::Parse { index })?;
        let Some(workload) = decode_workload(index, value)? else {
            continue;
        };

        let annotations = workload.annotations();
        let name = workload.key().to_string();
        if manages_hpa(&annotations) {
            rendered.push(to_yaml(&name, &build_desired_hpa(&workload))?);
        }
        if enable_vpa && manages_vpa(&annotations) {
            let vpa = build_desired_vpa(&workload)
                .change_context_lazy(|| RenderError::Build { name: name.clone() })?;
            rendered.push(to_yaml(&name, &vpa)?);
        }
    }

    Ok(rendered.join("---\n"))
}

fn decode_workload(
    index: usize,
    value: serde_yaml::Value,
) -> Result<Option<Workload>, Report<RenderError>> {
    let name = value.get("kind").and_then(serde_yaml::Value::as_str);
    let Some(kind) = name.and_then(WorkloadKind::from_kind_name) else {
        tracing::debug!(index, kind = ?name, "skipping unsupported document");
        return Ok(None);
    };

    let workload = match kind {
        WorkloadKind::Deployment => Workload::from(decode::<Deployment>(index, kind, value)?),
        WorkloadKind::StatefulSet => Workload::from(decode::<StatefulSet>(index, kind, value)?),
        WorkloadKind::DaemonSet => Workload::from(decode::<DaemonSet>(index, kind, value)?),
    };
    Ok(Some(workload))
}

fn decode<K>(
    index: usize,
    kind: WorkloadKind,
    value: serde_yaml::Value,
) -> Result<K, Report<RenderError>>
where
    K: Resource + DeserializeOwned,
{
    let mut object: K =
        serde_yaml::from_value(value).change_context(RenderError::Decode { index, kind })?;
    object
        .meta_mut()
        .namespace
        .get_or_insert_with(|| DEFAULT_NAMESPACE.to_string());
    Ok(object)
}

fn to_yaml<T: Serialize>(name: &str, object: &T) -> Result<String, Report<RenderError>> {
    serde_yaml::to_string(object).change_context_lazy(|| RenderError::Serialize {
        name: name.to_string(),
    })
}
