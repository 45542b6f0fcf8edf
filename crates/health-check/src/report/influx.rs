use error_stack::Report;
use error_stack::ResultExt;
use influxdb_line_protocol::LineProtocolBuilder;

use super::ClusterReport;
use super::RenderError;
use super::ReportRenderer;

/// A single line-protocol field value.
#[derive(Debug, Clone)]
enum FieldValue {
    String(String),
    UnsignedInteger(u64),
    Float(f64),
    Boolean(bool),
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::UnsignedInteger(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::UnsignedInteger(u64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

/// InfluxDB line protocol, one line per cluster, node, workload and anomaly.
pub struct InfluxRenderer;

impl ReportRenderer for InfluxRenderer {
    fn render(&self, report: &ClusterReport) -> Result<String, Report<RenderError>> {
        let timestamp = report.generated_at.timestamp_nanos_opt().unwrap_or_default();
        let capacity = &report.capacity;
        let mut out = String::new();

        let mut cluster_fields = vec![
            ("healthy", report.healthy.into()),
            ("partial", report.partial.into()),
            ("anomalies", (report.anomalies.len() as u64).into()),
            ("total_gpus", capacity.total_gpus.into()),
            ("requested_gpus", capacity.requested_gpus.into()),
            ("ready_parallel_requests", capacity.ready_parallel_requests.into()),
            ("desired_parallel_requests", capacity.desired_parallel_requests.into()),
            ("capacity_ratio", capacity.capacity_ratio.into()),
        ];
        // unknown inventory leaves these out rather than reporting zero
        if let Some(free) = capacity.free_gpus {
            cluster_fields.push(("free_gpus", free.into()));
        }
        if let Some(headroom) = capacity.headroom_parallel_requests {
            cluster_fields.push(("headroom_parallel_requests", headroom.into()));
        }
        out.push_str(&encode_line("cluster_health", &[], cluster_fields, timestamp)?);

        for node in &report.nodes {
            let condition = node.condition.to_string();
            let mut fields = vec![
                ("gpu_count", node.gpu_count.into()),
                ("observed_gpus", (node.gpu_samples.len() as u64).into()),
            ];
            if let Some(utilization) = node.mean_utilization() {
                fields.push(("mean_utilization", utilization.into()));
            }
            out.push_str(&encode_line(
                "node_health",
                &[
                    ("node", node.name.as_str()),
                    ("condition", condition.as_str()),
                    ("reachability", node.reachability.label()),
                ],
                fields,
                timestamp,
            )?);
        }

        for workload in &report.workloads {
            let kind = workload.kind.to_string();
            out.push_str(&encode_line(
                "workload_health",
                &[
                    ("namespace", workload.namespace.as_str()),
                    ("workload", workload.name.as_str()),
                    ("kind", kind.as_str()),
                ],
                vec![
                    ("desired_replicas", workload.desired_replicas.into()),
                    ("ready_replicas", workload.ready_replicas.into()),
                    ("gpus_per_replica", workload.gpus_per_replica.into()),
                    ("allocated_gpus", workload.allocated_gpus().into()),
                    ("placement_known", (!workload.is_degraded()).into()),
                ],
                timestamp,
            )?);
        }

        for anomaly in &report.anomalies {
            let subject = anomaly.subject();
            out.push_str(&encode_line(
                "health_anomaly",
                &[("kind", anomaly.kind()), ("subject", subject.as_str())],
                vec![("message", anomaly.to_string().into())],
                timestamp,
            )?);
        }

        Ok(out)
    }
}

fn encode_line(
    measurement: &str,
    tags: &[(&str, &str)],
    fields: Vec<(&str, FieldValue)>,
    timestamp: i64,
) -> Result<String, Report<RenderError>> {
    let mut builder = LineProtocolBuilder::new().measurement(measurement);

    // empty tag values are not representable in line protocol
    for (key, value) in tags.iter().filter(|(_, value)| !value.is_empty()) {
        builder = builder.tag(key, value);
    }

    let mut fields = fields.into_iter();
    let Some((first_key, first_value)) = fields.next() else {
        return Err(Report::new(RenderError::Encode {
            message: format!("{measurement} has no fields"),
        }));
    };

    let mut line = match first_value {
        FieldValue::String(s) => builder.field(first_key, s.as_str()),
        FieldValue::UnsignedInteger(u) => builder.field(first_key, u),
        FieldValue::Float(f) => builder.field(first_key, f),
        FieldValue::Boolean(b) => builder.field(first_key, b),
    };
    for (key, value) in fields {
        line = match value {
            FieldValue::String(s) => line.field(key, s.as_str()),
            FieldValue::UnsignedInteger(u) => line.field(key, u),
            FieldValue::Float(f) => line.field(key, f),
            FieldValue::Boolean(b) => line.field(key, b),
        };
    }

    let bytes = line.timestamp(timestamp).close_line().build();
    String::from_utf8(bytes).change_context(RenderError::Encode {
        message: format!("{measurement} line is not valid UTF-8"),
    })
}
