use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;

use crate::k8s::KubernetesError;
use crate::model::NodeCondition;

/// Control-plane view of a node, before GPU telemetry is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: String,
    pub condition: NodeCondition,
    pub gpu_count: u32,
}

impl NodeInfo {
    /// Extract name, condition and allocatable GPUs from a node object.
    ///
    /// # Errors
    ///
    /// - [`KubernetesError::InvalidResource`] if the GPU quantity is not a whole number
    pub fn from_node(node: &Node, gpu_resource: &str) -> Result<Self, Report<KubernetesError>> {
        let name = node.name_any();
        let gpu_count = match node
            .status
            .as_ref()
            .and_then(|status| status.allocatable.as_ref())
            .and_then(|allocatable| allocatable.get(gpu_resource))
        {
            Some(quantity) => parse_gpu_quantity(quantity)
                .attach_printable_lazy(|| format!("node {name}, resource {gpu_resource}"))?,
            None => 0,
        };

        Ok(Self {
            condition: node_condition(node),
            name,
            gpu_count,
        })
    }
}

/// Cordoned wins over readiness: a cordoned node takes no new pods either way.
pub fn node_condition(node: &Node) -> NodeCondition {
    let unschedulable = node
        .spec
        .as_ref()
        .and_then(|spec| spec.unschedulable)
        .unwrap_or(false);
    if unschedulable {
        return NodeCondition::Cordoned;
    }

    let ready = node
        .status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
        .is_some_and(|c| c.status == "True");

    if ready {
        NodeCondition::Ready
    } else {
        NodeCondition::NotReady
    }
}

/// Parse an extended-resource quantity such as `2` or `2000m` into whole devices.
///
/// # Errors
///
/// - [`KubernetesError::InvalidResource`] for fractional or malformed quantities
pub fn parse_gpu_quantity(quantity: &Quantity) -> Result<u32, Report<KubernetesError>> {
    let value = quantity.0.trim();
    let invalid = || KubernetesError::InvalidResource {
        resource: "gpu quantity".to_string(),
        message: format!("expected a whole number of devices, got {value:?}"),
    };

    if let Some(milli) = value.strip_suffix('m') {
        let milli = milli.parse::<u64>().change_context_lazy(invalid)?;
        if milli % 1000 != 0 {
            return Err(Report::new(invalid()));
        }
        return u32::try_from(milli / 1000).change_context_lazy(invalid);
    }

    value.parse::<u32>().change_context_lazy(invalid)
}
