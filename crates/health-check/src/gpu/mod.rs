//! Node-local GPU telemetry.

use core::error::Error;

use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;

use crate::model::GpuSample;

pub mod command;
pub mod nvml;

pub use command::CommandProbe;
pub use nvml::NvmlProbe;

/// Query fields expected by [`parse_nvidia_smi_csv`], in order.
pub const NVIDIA_SMI_QUERY: &str = "index,uuid,utilization.gpu,memory.used,memory.total";

/// Errors that can occur while querying GPU telemetry.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum ProbeError {
    #[display("GPU query command failed: {message}")]
    CommandFailed { message: String },
    #[display("Failed to parse GPU query output: {message}")]
    ParseFailed { message: String },
    #[display("NVML error: {message}")]
    Nvml { message: String },
}

impl Error for ProbeError {}

/// Source of per-node GPU samples.
#[async_trait]
pub trait GpuProbe: Send + Sync {
    /// Whether this probe can reach `node` at all.
    fn covers(&self, _node: &str) -> bool {
        true
    }

    async fn probe(&self, node: &str) -> Result<Vec<GpuSample>, Report<ProbeError>>;
}

/// Probe used when telemetry is disabled; covers no node.
pub struct NoopProbe;

#[async_trait]
impl GpuProbe for NoopProbe {
    fn covers(&self, _node: &str) -> bool {
        false
    }

    async fn probe(&self, node: &str) -> Result<Vec<GpuSample>, Report<ProbeError>> {
        Err(Report::new(ProbeError::CommandFailed {
            message: format!("GPU telemetry disabled, cannot probe {node}"),
        }))
    }
}

/// Parse `nvidia-smi --query-gpu=... --format=csv,noheader,nounits` output.
///
/// Accepts the five columns of [`NVIDIA_SMI_QUERY`], or four when the uuid is
/// left out. Values reported as `[N/A]` or `[Not Supported]` read as zero.
///
/// # Errors
///
/// - [`ProbeError::ParseFailed`] if a line has the wrong shape or a bad number
pub fn parse_nvidia_smi_csv(output: &str) -> Result<Vec<GpuSample>, Report<ProbeError>> {
    let mut samples = Vec::new();

    for (line_no, line) in output.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let (index, uuid, numbers) = match fields.as_slice() {
            [index, uuid, rest @ ..] if rest.len() == 3 => (*index, Some(*uuid), rest),
            [index, rest @ ..] if rest.len() == 3 => (*index, None, rest),
            _ => {
                return Err(Report::new(ProbeError::ParseFailed {
                    message: format!(
                        "line {}: expected 4 or 5 columns, got {}",
                        line_no + 1,
                        fields.len()
                    ),
                }))
            }
        };

        let parse_failed = || ProbeError::ParseFailed {
            message: format!("line {}: {line:?}", line_no + 1),
        };

        samples.push(GpuSample {
            index: index.parse::<u32>().change_context_lazy(parse_failed)?,
            uuid: uuid.map(str::to_string),
            utilization_percent: parse_reading::<u32>(numbers[0]).change_context_lazy(parse_failed)?,
            memory_used_mib: parse_reading::<u64>(numbers[1]).change_context_lazy(parse_failed)?,
            memory_total_mib: parse_reading::<u64>(numbers[2]).change_context_lazy(parse_failed)?,
        });
    }

    Ok(samples)
}

fn parse_reading<T>(value: &str) -> Result<T, T::Err>
where
    T: std::str::FromStr + Default,
{
    if value.starts_with('[') {
        return Ok(T::default());
    }
    // some drivers print fractional utilization
    value.split('.').next().unwrap_or(value).parse()
}
