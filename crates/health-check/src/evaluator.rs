//! Pure capacity evaluation over collected snapshots.
//!
//! Nothing here performs I/O; identical inputs always give identical output.

use serde::Serialize;

use crate::model::ClusterSnapshot;
use crate::model::NodeCondition;
use crate::model::NodeStatus;
use crate::model::Reachability;
use crate::model::WorkloadStatus;

/// Expectations the cluster is checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationPolicy {
    /// Parallel requests per pod when a workload declares none.
    pub parallelism_per_pod: u32,
    /// GPUs every GPU node should advertise.
    pub expected_gpus_per_node: Option<u32>,
}

impl Default for EvaluationPolicy {
    fn default() -> Self {
        Self {
            parallelism_per_pod: 1,
            expected_gpus_per_node: None,
        }
    }
}

/// A detected deviation from expected capacity or health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, derive_more::Display)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    #[display("workloads request {requested} GPUs but nodes provide {available}")]
    GpuOverAllocation { requested: u64, available: u64 },
    #[display("node {node} is not ready")]
    NodeNotReady { node: String },
    #[display("node {node} is unreachable: {reason}")]
    NodeUnreachable { node: String, reason: String },
    #[display("node {node} advertises {actual} GPUs, expected {expected}")]
    GpuCountMismatch {
        node: String,
        expected: u32,
        actual: u32,
    },
    #[display("node {node} advertises {allocatable} GPUs but telemetry sees {observed}")]
    TelemetryMismatch {
        node: String,
        allocatable: u32,
        observed: u32,
    },
    #[display("{namespace}/{workload} has {ready}/{desired} replicas ready")]
    ReplicasBelowDesired {
        namespace: String,
        workload: String,
        desired: u32,
        ready: u32,
    },
    #[display("{namespace}/{workload} pod placement unknown: {reason}")]
    WorkloadDataMissing {
        namespace: String,
        workload: String,
        reason: String,
    },
    #[display("{namespace}/{workload} pod {pod} runs on cordoned node {node}")]
    CordonedNodeScheduled {
        namespace: String,
        workload: String,
        pod: String,
        node: String,
    },
    #[display("collection incomplete: {reason}")]
    IncompleteCollection { reason: String },
}

impl Anomaly {
    /// Node or workload the anomaly is about, for tabular output.
    pub fn subject(&self) -> String {
        match self {
            Anomaly::GpuOverAllocation { .. } | Anomaly::IncompleteCollection { .. } => {
                "cluster".to_string()
            }
            Anomaly::NodeNotReady { node }
            | Anomaly::NodeUnreachable { node, .. }
            | Anomaly::GpuCountMismatch { node, .. }
            | Anomaly::TelemetryMismatch { node, .. } => format!("node/{node}"),
            Anomaly::ReplicasBelowDesired {
                namespace,
                workload,
                ..
            }
            | Anomaly::WorkloadDataMissing {
                namespace,
                workload,
                ..
            }
            | Anomaly::CordonedNodeScheduled {
                namespace,
                workload,
                ..
            } => format!("{namespace}/{workload}"),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Anomaly::GpuOverAllocation { .. } => "gpu_over_allocation",
            Anomaly::NodeNotReady { .. } => "node_not_ready",
            Anomaly::NodeUnreachable { .. } => "node_unreachable",
            Anomaly::GpuCountMismatch { .. } => "gpu_count_mismatch",
            Anomaly::TelemetryMismatch { .. } => "telemetry_mismatch",
            Anomaly::ReplicasBelowDesired { .. } => "replicas_below_desired",
            Anomaly::WorkloadDataMissing { .. } => "workload_data_missing",
            Anomaly::CordonedNodeScheduled { .. } => "cordoned_node_scheduled",
            Anomaly::IncompleteCollection { .. } => "incomplete_collection",
        }
    }
}

/// Derived GPU and parallel-request capacity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapacityScore {
    pub total_gpus: u64,
    pub requested_gpus: u64,
    /// `None` when the node listing is missing and the inventory is unknown.
    pub free_gpus: Option<u64>,
    pub ready_parallel_requests: u64,
    pub desired_parallel_requests: u64,
    /// Extra parallel requests if free GPUs were filled with the smallest GPU pod.
    pub headroom_parallel_requests: Option<u64>,
    /// Ready over desired parallel requests; 1.0 when nothing is desired.
    pub capacity_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub capacity: CapacityScore,
    pub anomalies: Vec<Anomaly>,
}

pub fn evaluate(
    nodes: &[NodeStatus],
    workloads: &[WorkloadStatus],
    policy: &EvaluationPolicy,
) -> Evaluation {
    assess(nodes, workloads, policy, true)
}

/// Evaluate a collected snapshot.
///
/// Without a node listing the GPU inventory is unknown: over-allocation is not
/// judged and free GPUs and headroom are left empty.
pub fn evaluate_snapshot(snapshot: &ClusterSnapshot, policy: &EvaluationPolicy) -> Evaluation {
    assess(
        &snapshot.nodes,
        &snapshot.workloads,
        policy,
        snapshot.nodes_listed,
    )
}

fn assess(
    nodes: &[NodeStatus],
    workloads: &[WorkloadStatus],
    policy: &EvaluationPolicy,
    inventory_known: bool,
) -> Evaluation {
    let capacity = capacity_score(nodes, workloads, policy, inventory_known);

    let mut anomalies = Vec::new();
    if inventory_known && capacity.requested_gpus > capacity.total_gpus {
        anomalies.push(Anomaly::GpuOverAllocation {
            requested: capacity.requested_gpus,
            available: capacity.total_gpus,
        });
    }

    for node in nodes {
        node_anomalies(node, policy, &mut anomalies);
    }

    for workload in workloads {
        workload_anomalies(workload, nodes, &mut anomalies);
    }

    Evaluation {
        capacity,
        anomalies,
    }
}

fn capacity_score(
    nodes: &[NodeStatus],
    workloads: &[WorkloadStatus],
    policy: &EvaluationPolicy,
    inventory_known: bool,
) -> CapacityScore {
    let total_gpus: u64 = nodes.iter().map(|n| u64::from(n.gpu_count)).sum();
    let requested_gpus: u64 = workloads.iter().map(WorkloadStatus::allocated_gpus).sum();
    let free_gpus = inventory_known.then(|| total_gpus.saturating_sub(requested_gpus));

    let serving = workloads.iter().filter(|w| w.gpus_per_replica > 0);
    let parallelism =
        |w: &WorkloadStatus| u64::from(w.parallelism.unwrap_or(policy.parallelism_per_pod));

    let ready_parallel_requests: u64 = serving
        .clone()
        .map(|w| u64::from(w.ready_replicas) * parallelism(w))
        .sum();
    let desired_parallel_requests: u64 = serving
        .clone()
        .map(|w| u64::from(w.desired_replicas) * parallelism(w))
        .sum();

    let smallest_request = serving.map(|w| u64::from(w.gpus_per_replica)).min();
    let headroom_parallel_requests = free_gpus.map(|free| {
        smallest_request
            .map(|smallest| free / smallest * u64::from(policy.parallelism_per_pod))
            .unwrap_or(0)
    });

    let capacity_ratio = if desired_parallel_requests == 0 {
        1.0
    } else {
        ready_parallel_requests as f64 / desired_parallel_requests as f64
    };

    CapacityScore {
        total_gpus,
        requested_gpus,
        free_gpus,
        ready_parallel_requests,
        desired_parallel_requests,
        headroom_parallel_requests,
        capacity_ratio,
    }
}

fn node_anomalies(node: &NodeStatus, policy: &EvaluationPolicy, anomalies: &mut Vec<Anomaly>) {
    if node.condition == NodeCondition::NotReady {
        anomalies.push(Anomaly::NodeNotReady {
            node: node.name.clone(),
        });
    }

    if let Reachability::Unreachable { reason } = &node.reachability {
        anomalies.push(Anomaly::NodeUnreachable {
            node: node.name.clone(),
            reason: reason.clone(),
        });
    }

    if let Some(expected) = policy.expected_gpus_per_node {
        if node.gpu_count > 0 && node.gpu_count != expected {
            anomalies.push(Anomaly::GpuCountMismatch {
                node: node.name.clone(),
                expected,
                actual: node.gpu_count,
            });
        }
    }

    let observed = u32::try_from(node.gpu_samples.len()).unwrap_or(u32::MAX);
    if node.reachability == Reachability::Reachable
        && !node.gpu_samples.is_empty()
        && observed != node.gpu_count
    {
        anomalies.push(Anomaly::TelemetryMismatch {
            node: node.name.clone(),
            allocatable: node.gpu_count,
            observed,
        });
    }
}

fn workload_anomalies(
    workload: &WorkloadStatus,
    nodes: &[NodeStatus],
    anomalies: &mut Vec<Anomaly>,
) {
    if workload.ready_replicas < workload.desired_replicas {
        anomalies.push(Anomaly::ReplicasBelowDesired {
            namespace: workload.namespace.clone(),
            workload: workload.name.clone(),
            desired: workload.desired_replicas,
            ready: workload.ready_replicas,
        });
    }

    let Some(placements) = &workload.placements else {
        anomalies.push(Anomaly::WorkloadDataMissing {
            namespace: workload.namespace.clone(),
            workload: workload.name.clone(),
            reason: workload
                .placement_error
                .clone()
                .unwrap_or_else(|| "pod query did not complete".to_string()),
        });
        return;
    };

    for placement in placements {
        let Some(node_name) = &placement.node else {
            continue;
        };
        let cordoned = nodes
            .iter()
            .any(|n| &n.name == node_name && n.condition == NodeCondition::Cordoned);
        if cordoned {
            anomalies.push(Anomaly::CordonedNodeScheduled {
                namespace: workload.namespace.clone(),
                workload: workload.name.clone(),
                pod: placement.pod.clone(),
                node: node_name.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::model::fixtures::*;
    use crate::model::PodPlacement;

    fn three_gpu_nodes() -> Vec<NodeStatus> {
        vec![gpu_node("gpu-1", 2), gpu_node("gpu-2", 2), gpu_node("gpu-3", 2)]
    }

    #[test]
    fn exact_fit_has_no_anomaly() {
        let evaluation = evaluate(
            &three_gpu_nodes(),
            &[gpu_deployment("ollama", 3, 2)],
            &EvaluationPolicy::default(),
        );
        assert_eq!(evaluation.anomalies, Vec::new());
        assert_eq!(evaluation.capacity.total_gpus, 6);
        assert_eq!(evaluation.capacity.requested_gpus, 6);
        assert_eq!(evaluation.capacity.free_gpus, Some(0));
    }

    #[test]
    fn over_allocation_is_reported() {
        let evaluation = evaluate(
            &three_gpu_nodes(),
            &[gpu_deployment("ollama", 4, 2)],
            &EvaluationPolicy::default(),
        );
        assert_eq!(
            evaluation.anomalies,
            vec![Anomaly::GpuOverAllocation {
                requested: 8,
                available: 6,
            }]
        );
        assert_eq!(evaluation.capacity.free_gpus, Some(0));
    }

    #[test]
    fn over_allocation_sums_across_workloads() {
        let nodes = vec![gpu_node("gpu-1", 1)];
        for (a, b) in [(0, 1), (1, 1), (2, 0), (1, 0)] {
            let workloads = vec![gpu_deployment("a", a, 1), gpu_deployment("b", b, 1)];
            let evaluation = evaluate(&nodes, &workloads, &EvaluationPolicy::default());
            let over = evaluation
                .anomalies
                .iter()
                .any(|anomaly| matches!(anomaly, Anomaly::GpuOverAllocation { .. }));
            assert_eq!(over, a + b > 1, "replicas {a}+{b}");
        }
    }

    #[test]
    fn evaluation_is_idempotent() {
        let mut nodes = three_gpu_nodes();
        nodes[1].condition = NodeCondition::Cordoned;
        let mut workload = gpu_deployment("ollama", 4, 2);
        workload.ready_replicas = 2;
        workload.placements = Some(vec![PodPlacement {
            pod: "ollama-0".to_string(),
            node: Some("gpu-2".to_string()),
            ready: true,
        }]);
        let workloads = vec![workload];
        let policy = EvaluationPolicy {
            parallelism_per_pod: 4,
            expected_gpus_per_node: Some(2),
        };

        let first = evaluate(&nodes, &workloads, &policy);
        let second = evaluate(&nodes, &workloads, &policy);
        assert_eq!(first, second);
    }

    #[test]
    fn replicas_below_desired() {
        let mut workload = gpu_deployment("ollama", 3, 2);
        workload.ready_replicas = 1;
        let evaluation = evaluate(&three_gpu_nodes(), &[workload], &EvaluationPolicy::default());
        assert_eq!(
            evaluation.anomalies,
            vec![Anomaly::ReplicasBelowDesired {
                namespace: "ollama".to_string(),
                workload: "ollama".to_string(),
                desired: 3,
                ready: 1,
            }]
        );
    }

    #[test]
    fn pod_on_cordoned_node() {
        let mut nodes = three_gpu_nodes();
        nodes[2].condition = NodeCondition::Cordoned;
        let mut workload = gpu_deployment("ollama", 2, 2);
        workload.placements = Some(vec![
            PodPlacement {
                pod: "ollama-a".to_string(),
                node: Some("gpu-1".to_string()),
                ready: true,
            },
            PodPlacement {
                pod: "ollama-b".to_string(),
                node: Some("gpu-3".to_string()),
                ready: true,
            },
            PodPlacement {
                pod: "ollama-c".to_string(),
                node: None,
                ready: false,
            },
        ]);

        let evaluation = evaluate(&nodes, &[workload], &EvaluationPolicy::default());
        assert_eq!(
            evaluation.anomalies,
            vec![Anomaly::CordonedNodeScheduled {
                namespace: "ollama".to_string(),
                workload: "ollama".to_string(),
                pod: "ollama-b".to_string(),
                node: "gpu-3".to_string(),
            }]
        );
    }

    #[test]
    fn degraded_entries_become_anomalies() {
        let mut nodes = three_gpu_nodes();
        nodes[0].reachability = Reachability::Unreachable {
            reason: "telemetry query timed out".to_string(),
        };
        nodes[0].gpu_samples.clear();
        nodes[1].condition = NodeCondition::NotReady;
        let mut workload = gpu_deployment("open-webui", 1, 0);
        workload.placements = None;
        workload.placement_error = Some("list pods: timed out".to_string());

        let evaluation = evaluate(&nodes, &[workload], &EvaluationPolicy::default());
        assert_eq!(
            evaluation.anomalies,
            vec![
                Anomaly::NodeUnreachable {
                    node: "gpu-1".to_string(),
                    reason: "telemetry query timed out".to_string(),
                },
                Anomaly::NodeNotReady {
                    node: "gpu-2".to_string(),
                },
                Anomaly::WorkloadDataMissing {
                    namespace: "ollama".to_string(),
                    workload: "open-webui".to_string(),
                    reason: "list pods: timed out".to_string(),
                },
            ]
        );
    }

    #[test]
    fn gpu_count_expectations() {
        let mut nodes = three_gpu_nodes();
        nodes.push(gpu_node("control-plane", 0));
        nodes[1].gpu_count = 1;
        let policy = EvaluationPolicy {
            expected_gpus_per_node: Some(2),
            ..Default::default()
        };

        let evaluation = evaluate(&nodes, &[], &policy);
        assert_eq!(
            evaluation.anomalies,
            vec![
                Anomaly::GpuCountMismatch {
                    node: "gpu-2".to_string(),
                    expected: 2,
                    actual: 1,
                },
                Anomaly::TelemetryMismatch {
                    node: "gpu-2".to_string(),
                    allocatable: 1,
                    observed: 2,
                },
            ]
        );
    }

    #[test]
    fn parallel_capacity_and_headroom() {
        let mut nodes = three_gpu_nodes();
        nodes.push(gpu_node("gpu-4", 4));
        let mut ollama = gpu_deployment("ollama", 3, 2);
        ollama.ready_replicas = 2;
        ollama.parallelism = Some(4);
        let webui = gpu_deployment("open-webui", 2, 0);
        let policy = EvaluationPolicy {
            parallelism_per_pod: 2,
            expected_gpus_per_node: None,
        };

        let capacity = evaluate(&nodes, &[ollama, webui], &policy).capacity;
        assert_eq!(
            capacity,
            CapacityScore {
                total_gpus: 10,
                requested_gpus: 6,
                free_gpus: Some(4),
                ready_parallel_requests: 8,
                desired_parallel_requests: 12,
                headroom_parallel_requests: Some(4),
                capacity_ratio: 8.0 / 12.0,
            }
        );
    }

    #[test]
    fn missing_node_listing_leaves_inventory_unknown() {
        let snapshot = ClusterSnapshot {
            workloads: vec![gpu_deployment("ollama", 1, 2)],
            issues: vec!["node listing timed out".to_string()],
            nodes_listed: false,
            ..Default::default()
        };
        let evaluation = evaluate_snapshot(&snapshot, &EvaluationPolicy::default());

        assert_eq!(evaluation.anomalies, Vec::new());
        assert_eq!(evaluation.capacity.requested_gpus, 2);
        assert_eq!(evaluation.capacity.free_gpus, None);
        assert_eq!(evaluation.capacity.headroom_parallel_requests, None);
    }

    #[test]
    fn listed_snapshot_judges_over_allocation() {
        let snapshot = ClusterSnapshot {
            nodes: three_gpu_nodes(),
            workloads: vec![gpu_deployment("ollama", 4, 2)],
            ..Default::default()
        };
        let evaluation = evaluate_snapshot(&snapshot, &EvaluationPolicy::default());
        assert_eq!(
            evaluation.anomalies,
            evaluate(&snapshot.nodes, &snapshot.workloads, &EvaluationPolicy::default()).anomalies
        );
        assert_eq!(evaluation.anomalies.len(), 1);
    }

    #[test]
    fn empty_cluster_is_fully_healthy() {
        let evaluation = evaluate(&[], &[], &EvaluationPolicy::default());
        assert_eq!(evaluation.anomalies, Vec::new());
        assert_eq!(evaluation.capacity.capacity_ratio, 1.0);
        assert_eq!(evaluation.capacity.headroom_parallel_requests, Some(0));
    }

    #[test]
    fn anomaly_subjects() {
        let cordoned = Anomaly::CordonedNodeScheduled {
            namespace: "ollama".to_string(),
            workload: "ollama".to_string(),
            pod: "ollama-0".to_string(),
            node: "gpu-1".to_string(),
        };
        assert_eq!(cordoned.subject(), "ollama/ollama");
        assert_eq!(cordoned.kind(), "cordoned_node_scheduled");
        assert_eq!(
            Anomaly::NodeNotReady {
                node: "gpu-1".to_string()
            }
            .subject(),
            "node/gpu-1"
        );
    }
}
