//! Point-in-time snapshots produced by one collection cycle.

use serde::Serialize;

/// Scheduling condition of a node as seen by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum NodeCondition {
    Ready,
    NotReady,
    Cordoned,
}

/// Outcome of the GPU telemetry query for a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Reachability {
    Reachable,
    Unreachable { reason: String },
    /// The configured probe does not cover this node.
    NotProbed,
}

impl Reachability {
    pub fn label(&self) -> &'static str {
        match self {
            Reachability::Reachable => "reachable",
            Reachability::Unreachable { .. } => "unreachable",
            Reachability::NotProbed => "not-probed",
        }
    }
}

/// One GPU as reported by the node-local telemetry utility.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuSample {
    pub index: u32,
    pub uuid: Option<String>,
    pub utilization_percent: u32,
    pub memory_used_mib: u64,
    pub memory_total_mib: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStatus {
    pub name: String,
    pub condition: NodeCondition,
    pub reachability: Reachability,
    /// Allocatable amount of the GPU extended resource.
    pub gpu_count: u32,
    pub gpu_samples: Vec<GpuSample>,
}

impl NodeStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self.reachability, Reachability::Unreachable { .. })
    }

    pub fn mean_utilization(&self) -> Option<f64> {
        if self.gpu_samples.is_empty() {
            return None;
        }
        let total: u64 = self
            .gpu_samples
            .iter()
            .map(|s| u64::from(s.utilization_percent))
            .sum();
        Some(total as f64 / self.gpu_samples.len() as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadKind {
    Deployment,
    DaemonSet,
    StatefulSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodPlacement {
    pub pod: String,
    /// `None` while the pod is still pending scheduling.
    pub node: Option<String>,
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkloadStatus {
    pub kind: WorkloadKind,
    pub name: String,
    pub namespace: String,
    pub desired_replicas: u32,
    pub ready_replicas: u32,
    pub gpus_per_replica: u32,
    /// Parallel requests per pod declared on the pod template, if any.
    pub parallelism: Option<u32>,
    /// `None` when the pod query failed or timed out.
    pub placements: Option<Vec<PodPlacement>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement_error: Option<String>,
}

impl WorkloadStatus {
    /// GPUs the workload asks for once every desired replica is scheduled.
    pub fn allocated_gpus(&self) -> u64 {
        u64::from(self.desired_replicas) * u64::from(self.gpus_per_replica)
    }

    pub fn is_degraded(&self) -> bool {
        self.placements.is_none()
    }

    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Raw output of the collector, before evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSnapshot {
    pub nodes: Vec<NodeStatus>,
    pub workloads: Vec<WorkloadStatus>,
    /// Collection-level problems that are not tied to one node or workload.
    pub issues: Vec<String>,
    pub cancelled: bool,
    /// The node listing answered, so `nodes` is the full GPU inventory.
    pub nodes_listed: bool,
}

impl Default for ClusterSnapshot {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            workloads: Vec::new(),
            issues: Vec::new(),
            cancelled: false,
            nodes_listed: true,
        }
    }
}

impl ClusterSnapshot {
    pub fn is_partial(&self) -> bool {
        self.cancelled
            || !self.nodes_listed
            || !self.issues.is_empty()
            || self.nodes.iter().any(NodeStatus::is_degraded)
            || self.workloads.iter().any(WorkloadStatus::is_degraded)
    }
}


#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::fixtures::*;
    use super::*;

    #[test]
    fn mean_utilization_averages_samples() {
        let mut node = gpu_node("gpu-1", 2);
        node.gpu_samples[1].utilization_percent = 80;
        assert_eq!(node.mean_utilization(), Some(60.0));

        node.gpu_samples.clear();
        assert_eq!(node.mean_utilization(), None);
    }

    #[test]
    fn snapshot_is_partial_when_anything_degraded() {
        let mut snapshot = ClusterSnapshot {
            nodes: vec![gpu_node("gpu-1", 2)],
            workloads: vec![gpu_deployment("ollama", 1, 2)],
            ..Default::default()
        };
        assert!(!snapshot.is_partial());

        snapshot.workloads[0].placements = None;
        assert!(snapshot.is_partial());

        snapshot.workloads[0].placements = Some(Vec::new());
        snapshot.nodes[0].reachability = Reachability::Unreachable {
            reason: "timed out".to_string(),
        };
        assert!(snapshot.is_partial());
    }

    #[test]
    fn not_probed_node_is_not_degraded() {
        let mut node = gpu_node("cp-1", 0);
        node.reachability = Reachability::NotProbed;
        assert!(!node.is_degraded());
    }
}
