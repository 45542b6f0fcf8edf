use core::error::Error;

use chrono::DateTime;
use chrono::Utc;
use error_stack::Report;
use serde::Serialize;

use crate::evaluator::evaluate_snapshot;
use crate::evaluator::Anomaly;
use crate::evaluator::CapacityScore;
use crate::evaluator::EvaluationPolicy;
use crate::model::ClusterSnapshot;
use crate::model::NodeStatus;
use crate::model::WorkloadStatus;

pub mod influx;
pub mod json;
pub mod table;
pub mod yaml;

/// Aggregated output of one collection cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterReport {
    pub generated_at: DateTime<Utc>,
    pub healthy: bool,
    /// Some nodes, workloads or listings are missing or degraded.
    pub partial: bool,
    pub capacity: CapacityScore,
    pub anomalies: Vec<Anomaly>,
    pub nodes: Vec<NodeStatus>,
    pub workloads: Vec<WorkloadStatus>,
}

impl ClusterReport {
    /// Evaluate a snapshot and fold collection-level issues in as anomalies.
    pub fn assemble(
        snapshot: ClusterSnapshot,
        policy: &EvaluationPolicy,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let partial = snapshot.is_partial();
        let mut evaluation = evaluate_snapshot(&snapshot, policy);

        evaluation.anomalies.extend(
            snapshot
                .issues
                .into_iter()
                .map(|reason| Anomaly::IncompleteCollection { reason }),
        );

        Self {
            generated_at,
            healthy: evaluation.anomalies.is_empty(),
            partial,
            capacity: evaluation.capacity,
            anomalies: evaluation.anomalies,
            nodes: snapshot.nodes,
            workloads: snapshot.workloads,
        }
    }
}

#[derive(Debug, derive_more::Display)]
pub enum RenderError {
    #[display("Failed to serialize report as {format}")]
    Serialize { format: &'static str },
    #[display("Failed to encode report: {message}")]
    Encode { message: String },
}

impl Error for RenderError {}

/// Formats a report; must not mutate it or write anywhere itself.
pub trait ReportRenderer: Send + Sync {
    fn render(&self, report: &ClusterReport) -> Result<String, Report<RenderError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
    Influx,
}

pub fn create_renderer(format: OutputFormat) -> Box<dyn ReportRenderer> {
    match format {
        OutputFormat::Table => Box::new(table::TableRenderer),
        OutputFormat::Json => Box::new(json::JsonRenderer),
        OutputFormat::Yaml => Box::new(yaml::YamlRenderer),
        OutputFormat::Influx => Box::new(influx::InfluxRenderer),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::TimeZone;

    use super::*;
    use crate::model::fixtures::*;
    use crate::model::NodeCondition;
    use crate::model::PodPlacement;
    use crate::model::Reachability;

    pub(crate) fn timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, 8, 30, 0).unwrap()
    }

    /// Two GPU nodes, one cordoned, and an Ollama deployment short one replica.
    pub(crate) fn degraded_report() -> ClusterReport {
        let mut nodes = vec![gpu_node("gpu-1", 2), gpu_node("gpu-2", 2)];
        nodes[1].condition = NodeCondition::Cordoned;
        nodes[1].reachability = Reachability::Unreachable {
            reason: "telemetry query timed out".to_string(),
        };
        nodes[1].gpu_samples.clear();

        let mut ollama = gpu_deployment("ollama", 2, 2);
        ollama.ready_replicas = 1;
        ollama.parallelism = Some(4);
        ollama.placements = Some(vec![PodPlacement {
            pod: "ollama-6c9d8-x2k4p".to_string(),
            node: Some("gpu-2".to_string()),
            ready: true,
        }]);

        let snapshot = ClusterSnapshot {
            nodes,
            workloads: vec![ollama],
            issues: Vec::new(),
            cancelled: false,
            nodes_listed: true,
        };
        ClusterReport::assemble(snapshot, &EvaluationPolicy::default(), timestamp())
    }
}
