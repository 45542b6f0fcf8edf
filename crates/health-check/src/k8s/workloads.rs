use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::ResourceExt;

use crate::k8s::nodes::parse_gpu_quantity;
use crate::k8s::KubernetesError;
use crate::model::PodPlacement;
use crate::model::WorkloadKind;

/// Which pod-template fields to read when describing a workload.
#[derive(Debug, Clone)]
pub struct TemplateKeys {
    pub gpu_resource: String,
    pub parallelism_env: String,
}

/// Control-plane view of a workload, before its pods are looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadInfo {
    pub kind: WorkloadKind,
    pub name: String,
    pub namespace: String,
    pub desired_replicas: u32,
    pub ready_replicas: u32,
    pub gpus_per_replica: u32,
    pub parallelism: Option<u32>,
    /// Rendered label selector; `None` when the workload selects nothing.
    pub selector: Option<String>,
}

impl WorkloadInfo {
    pub fn from_deployment(
        deployment: &Deployment,
        keys: &TemplateKeys,
    ) -> Result<Self, Report<KubernetesError>> {
        let spec = deployment.spec.as_ref();
        let status = deployment.status.as_ref();
        Self::build(
            WorkloadKind::Deployment,
            deployment.name_any(),
            deployment.namespace().unwrap_or_default(),
            spec.and_then(|s| s.replicas).unwrap_or(1),
            status.and_then(|s| s.ready_replicas).unwrap_or(0),
            spec.map(|s| &s.selector),
            spec.map(|s| &s.template),
            keys,
        )
    }

    pub fn from_daemon_set(
        daemon_set: &DaemonSet,
        keys: &TemplateKeys,
    ) -> Result<Self, Report<KubernetesError>> {
        let spec = daemon_set.spec.as_ref();
        let status = daemon_set.status.as_ref();
        Self::build(
            WorkloadKind::DaemonSet,
            daemon_set.name_any(),
            daemon_set.namespace().unwrap_or_default(),
            status.map(|s| s.desired_number_scheduled).unwrap_or(0),
            status.map(|s| s.number_ready).unwrap_or(0),
            spec.map(|s| &s.selector),
            spec.map(|s| &s.template),
            keys,
        )
    }

    pub fn from_stateful_set(
        stateful_set: &StatefulSet,
        keys: &TemplateKeys,
    ) -> Result<Self, Report<KubernetesError>> {
        let spec = stateful_set.spec.as_ref();
        let status = stateful_set.status.as_ref();
        Self::build(
            WorkloadKind::StatefulSet,
            stateful_set.name_any(),
            stateful_set.namespace().unwrap_or_default(),
            spec.and_then(|s| s.replicas).unwrap_or(1),
            status.and_then(|s| s.ready_replicas).unwrap_or(0),
            spec.map(|s| &s.selector),
            spec.map(|s| &s.template),
            keys,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        kind: WorkloadKind,
        name: String,
        namespace: String,
        desired: i32,
        ready: i32,
        selector: Option<&LabelSelector>,
        template: Option<&PodTemplateSpec>,
        keys: &TemplateKeys,
    ) -> Result<Self, Report<KubernetesError>> {
        let gpus_per_replica = match template {
            Some(template) => template_gpus(template, &keys.gpu_resource)
                .attach_printable_lazy(|| format!("{kind} {namespace}/{name}"))?,
            None => 0,
        };

        Ok(Self {
            kind,
            desired_replicas: non_negative(desired),
            ready_replicas: non_negative(ready),
            gpus_per_replica,
            parallelism: template.and_then(|t| template_parallelism(t, &keys.parallelism_env)),
            selector: selector.and_then(render_label_selector),
            name,
            namespace,
        })
    }
}

fn non_negative(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

/// Sum of GPU limits across containers; a container without a limit contributes its request.
fn template_gpus(
    template: &PodTemplateSpec,
    gpu_resource: &str,
) -> Result<u32, Report<KubernetesError>> {
    let Some(pod_spec) = template.spec.as_ref() else {
        return Ok(0);
    };

    let mut total: u32 = 0;
    for container in &pod_spec.containers {
        let Some(resources) = container.resources.as_ref() else {
            continue;
        };
        let quantity = resources
            .limits
            .as_ref()
            .and_then(|limits| limits.get(gpu_resource))
            .or_else(|| {
                resources
                    .requests
                    .as_ref()
                    .and_then(|requests| requests.get(gpu_resource))
            });
        if let Some(quantity) = quantity {
            let gpus = parse_gpu_quantity(quantity)
                .attach_printable_lazy(|| format!("container {}", container.name))?;
            total = u32::checked_add(total, gpus).ok_or_else(|| {
                Report::new(KubernetesError::InvalidResource {
                    resource: "gpu quantity".to_string(),
                    message: format!("GPU total overflows at container {}", container.name),
                })
            })?;
        }
    }
    Ok(total)
}

/// First parseable value of `env_name` on any container of the template.
fn template_parallelism(template: &PodTemplateSpec, env_name: &str) -> Option<u32> {
    template
        .spec
        .as_ref()?
        .containers
        .iter()
        .filter_map(|container| container.env.as_ref())
        .flatten()
        .filter(|var| var.name == env_name)
        .find_map(|var| var.value.as_deref()?.trim().parse::<u32>().ok())
}

/// Render a selector in the `kubectl -l` syntax accepted by list calls.
pub fn render_label_selector(selector: &LabelSelector) -> Option<String> {
    let mut terms = Vec::new();

    if let Some(labels) = &selector.match_labels {
        terms.extend(labels.iter().map(|(key, value)| format!("{key}={value}")));
    }

    for requirement in selector.match_expressions.iter().flatten() {
        let values = requirement.values.as_deref().unwrap_or_default().join(",");
        let term = match requirement.operator.as_str() {
            "In" => format!("{} in ({values})", requirement.key),
            "NotIn" => format!("{} notin ({values})", requirement.key),
            "Exists" => requirement.key.clone(),
            "DoesNotExist" => format!("!{}", requirement.key),
            other => {
                tracing::warn!(
                    key = %requirement.key,
                    operator = other,
                    "ignoring unknown label selector operator"
                );
                continue;
            }
        };
        terms.push(term);
    }

    (!terms.is_empty()).then(|| terms.join(","))
}

impl From<&Pod> for PodPlacement {
    fn from(pod: &Pod) -> Self {
        let ready = pod
            .status
            .as_ref()
            .and_then(|status| status.conditions.as_ref())
            .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
            .is_some_and(|c| c.status == "True");

        PodPlacement {
            pod: pod.name_any(),
            node: pod.spec.as_ref().and_then(|spec| spec.node_name.clone()),
            ready,
        }
    }
}
