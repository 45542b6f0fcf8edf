use std::fmt::Write;

use error_stack::Report;
use error_stack::ResultExt;
use prettytable::format;
use prettytable::row;
use prettytable::Table;

use super::ClusterReport;
use super::RenderError;
use super::ReportRenderer;

/// Plain-text tables for terminals.
pub struct TableRenderer;

impl TableRenderer {
    fn new_table() -> Table {
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_NO_LINESEP_WITH_TITLE);
        table
    }

    fn nodes(report: &ClusterReport) -> Table {
        let mut table = Self::new_table();
        table.set_titles(row!["NODE", "CONDITION", "TELEMETRY", "GPUS", "OBSERVED", "UTIL %"]);
        for node in &report.nodes {
            let utilization = node
                .mean_utilization()
                .map(|u| format!("{u:.0}"))
                .unwrap_or_else(|| "-".to_string());
            table.add_row(row![
                node.name,
                node.condition,
                node.reachability.label(),
                node.gpu_count,
                node.gpu_samples.len(),
                utilization
            ]);
        }
        table
    }

    fn workloads(report: &ClusterReport) -> Table {
        let mut table = Self::new_table();
        table.set_titles(row!["WORKLOAD", "KIND", "READY", "GPUS/REPLICA", "PARALLEL", "NODES"]);
        for workload in &report.workloads {
            let nodes = match &workload.placements {
                Some(placements) => {
                    let mut nodes: Vec<&str> = placements
                        .iter()
                        .map(|p| p.node.as_deref().unwrap_or("<pending>"))
                        .collect();
                    nodes.sort_unstable();
                    nodes.dedup();
                    nodes.join(",")
                }
                None => "?".to_string(),
            };
            let parallelism = workload
                .parallelism
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string());
            table.add_row(row![
                workload.qualified_name(),
                workload.kind,
                format!("{}/{}", workload.ready_replicas, workload.desired_replicas),
                workload.gpus_per_replica,
                parallelism,
                nodes
            ]);
        }
        table
    }

    fn anomalies(report: &ClusterReport) -> Table {
        let mut table = Self::new_table();
        table.set_titles(row!["ANOMALY", "SUBJECT", "DETAIL"]);
        for anomaly in &report.anomalies {
            table.add_row(row![anomaly.kind(), anomaly.subject(), anomaly]);
        }
        table
    }
}

impl ReportRenderer for TableRenderer {
    fn render(&self, report: &ClusterReport) -> Result<String, Report<RenderError>> {
        let mut out = String::new();
        write_report(&mut out, report).change_context(RenderError::Encode {
            message: "failed to format table".to_string(),
        })?;
        Ok(out)
    }
}

fn write_report(out: &mut String, report: &ClusterReport) -> std::fmt::Result {
    let status = match (report.healthy, report.partial) {
        (true, _) => "HEALTHY",
        (false, false) => "UNHEALTHY",
        (false, true) => "UNHEALTHY (partial data)",
    };
    let capacity = &report.capacity;

    writeln!(out, "Cluster health: {status}")?;
    writeln!(out, "Generated at:   {}", report.generated_at.to_rfc3339())?;
    writeln!(out)?;
    write!(out, "{}", TableRenderer::nodes(report))?;
    writeln!(out)?;
    write!(out, "{}", TableRenderer::workloads(report))?;
    writeln!(out)?;
    let or_unknown = |value: Option<u64>| value.map_or_else(|| "unknown".to_string(), |v| v.to_string());
    writeln!(
        out,
        "GPUs: {} total, {} requested, {} free",
        capacity.total_gpus,
        capacity.requested_gpus,
        or_unknown(capacity.free_gpus)
    )?;
    writeln!(
        out,
        "Parallel requests: {}/{} ready ({:.0}%), headroom {}",
        capacity.ready_parallel_requests,
        capacity.desired_parallel_requests,
        capacity.capacity_ratio * 100.0,
        or_unknown(capacity.headroom_parallel_requests)
    )?;
    if !report.anomalies.is_empty() {
        writeln!(out)?;
        write!(out, "{}", TableRenderer::anomalies(report))?;
    }
    Ok(())
}
