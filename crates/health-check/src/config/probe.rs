use clap::Parser;

use crate::gpu::NVIDIA_SMI_QUERY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum GpuProbeMode {
    /// Run a command per node and parse nvidia-smi CSV output
    Command,
    /// Query local GPUs through NVML
    Nvml,
    /// Skip GPU telemetry
    None,
}

/// Default per-node query, `{node}` is replaced by the node name.
pub fn default_query_command() -> String {
    format!("ssh {{node}} nvidia-smi --query-gpu={NVIDIA_SMI_QUERY} --format=csv,noheader,nounits")
}

/// GPU telemetry settings shared by `check` and `probe`.
#[derive(Parser, Debug, Clone)]
pub struct ProbeOptions {
    #[arg(
        long,
        env = "HEALTH_CHECK_GPU_PROBE",
        value_enum,
        default_value_t = GpuProbeMode::Command,
        help = "How per-node GPU telemetry is gathered"
    )]
    pub gpu_probe: GpuProbeMode,

    #[arg(
        long,
        env = "HEALTH_CHECK_GPU_QUERY_COMMAND",
        default_value_t = default_query_command(),
        help = "Command template for the command probe, {node} is replaced by the node name"
    )]
    pub gpu_query_command: String,

    #[arg(
        long,
        env = "GPU_NODE_NAME",
        help = "Node the NVML probe runs on; other nodes are not probed"
    )]
    pub node_name: Option<String>,

    #[arg(
        long,
        env = "HEALTH_CHECK_GPU_RESOURCE",
        default_value = "nvidia.com/gpu",
        help = "Extended resource name that counts GPUs"
    )]
    pub gpu_resource: String,
}

#[derive(Parser, Debug, Clone)]
pub struct ProbeArgs {
    /// Node to probe
    pub node: String,

    #[command(flatten)]
    pub probe: ProbeOptions,
}
