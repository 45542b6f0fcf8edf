use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::probe::ProbeOptions;
use crate::evaluator::EvaluationPolicy;
use crate::k8s::ClientOptions;
use crate::k8s::TemplateKeys;
use crate::report::OutputFormat;

#[derive(Parser, Debug, Clone)]
pub struct CheckArgs {
    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(long, env = "HEALTH_CHECK_CONTEXT", help = "Kubeconfig context to use")]
    pub context: Option<String>,

    #[arg(
        long = "namespace",
        short = 'n',
        env = "HEALTH_CHECK_NAMESPACES",
        value_delimiter = ',',
        help = "Namespaces to inspect, comma separated (empty for all namespaces)"
    )]
    pub namespaces: Vec<String>,

    #[arg(
        long = "timeout",
        env = "HEALTH_CHECK_TIMEOUT_SECS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Overall collection deadline in seconds"
    )]
    pub timeout_secs: u64,

    #[arg(
        long,
        env = "HEALTH_CHECK_EXPECTED_GPUS_PER_NODE",
        help = "Flag GPU nodes advertising a different GPU count"
    )]
    pub expected_gpus_per_node: Option<u32>,

    #[arg(
        long,
        env = "HEALTH_CHECK_PARALLELISM_PER_POD",
        default_value_t = 1,
        value_parser = clap::value_parser!(u32).range(1..),
        help = "Parallel requests per pod when a workload declares none"
    )]
    pub parallelism_per_pod: u32,

    #[arg(
        long,
        env = "HEALTH_CHECK_PARALLELISM_ENV",
        default_value = "OLLAMA_NUM_PARALLEL",
        help = "Container env var that declares per-pod parallelism"
    )]
    pub parallelism_env: String,

    #[arg(
        long,
        short = 'o',
        env = "HEALTH_CHECK_OUTPUT",
        value_enum,
        default_value_t = OutputFormat::Table,
        help = "Report format"
    )]
    pub output: OutputFormat,

    #[command(flatten)]
    pub probe: ProbeOptions,
}

impl CheckArgs {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            kubeconfig: self.kubeconfig.clone(),
            context: self.context.clone(),
            request_timeout: Some(self.timeout()),
        }
    }

    pub fn template_keys(&self) -> TemplateKeys {
        TemplateKeys {
            gpu_resource: self.probe.gpu_resource.clone(),
            parallelism_env: self.parallelism_env.clone(),
        }
    }

    pub fn policy(&self) -> EvaluationPolicy {
        EvaluationPolicy {
            parallelism_per_pod: self.parallelism_per_pod,
            expected_gpus_per_node: self.expected_gpus_per_node,
        }
    }
}
