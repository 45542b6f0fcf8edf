use std::io::Write;
use std::sync::Arc;

use chrono::Utc;
use error_stack::Report;
use error_stack::ResultExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collector::MetricsCollector;
use crate::config::CheckArgs;
use crate::config::GpuProbeMode;
use crate::config::ProbeArgs;
use crate::config::ProbeOptions;
use crate::error::ExitCode;
use crate::error::HealthCheckError;
use crate::evaluator::EvaluationPolicy;
use crate::gpu::command::CommandProbe;
use crate::gpu::nvml::NvmlProbe;
use crate::gpu::GpuProbe;
use crate::gpu::NoopProbe;
use crate::k8s::init_kube_client;
use crate::k8s::KubeClusterSource;
use crate::report::create_renderer;
use crate::report::ClusterReport;
use crate::report::ReportRenderer;

/// One collect, evaluate, render pass.
pub struct HealthCheck {
    collector: MetricsCollector,
    policy: EvaluationPolicy,
    renderer: Box<dyn ReportRenderer>,
}

impl HealthCheck {
    pub fn new(
        collector: MetricsCollector,
        policy: EvaluationPolicy,
        renderer: Box<dyn ReportRenderer>,
    ) -> Self {
        Self {
            collector,
            policy,
            renderer,
        }
    }

    /// Wire the Kubernetes client, GPU probe and renderer from the command line.
    pub async fn from_args(args: &CheckArgs) -> Result<Self, Report<HealthCheckError>> {
        let client = init_kube_client(&args.client_options())
            .await
            .map_err(|e| {
                let context = if e.current_context().is_unauthorized() {
                    HealthCheckError::AuthError {
                        message: e.current_context().to_string(),
                    }
                } else {
                    HealthCheckError::ClientSetup {
                        message: e.current_context().to_string(),
                    }
                };
                e.change_context(context)
            })?;

        let source = Arc::new(KubeClusterSource::new(client, args.template_keys()));
        let probe = build_probe(&args.probe)?;
        let collector =
            MetricsCollector::new(source, probe, args.namespaces.clone(), args.timeout());

        Ok(Self::new(collector, args.policy(), create_renderer(args.output)))
    }

    /// Run the pipeline and write the rendered report to `out`.
    ///
    /// Nothing is written when an error is returned.
    pub async fn run<W: Write>(
        &self,
        token: &CancellationToken,
        out: &mut W,
    ) -> Result<ExitCode, Report<HealthCheckError>> {
        let snapshot = self.collector.collect(token).await?;
        let report = ClusterReport::assemble(snapshot, &self.policy, Utc::now());

        tracing::info!(
            healthy = report.healthy,
            partial = report.partial,
            anomalies = report.anomalies.len(),
            "evaluation finished"
        );
        for anomaly in &report.anomalies {
            tracing::debug!(kind = anomaly.kind(), "{anomaly}");
        }

        let rendered = self
            .renderer
            .render(&report)
            .change_context_lazy(|| HealthCheckError::Render {
                message: "renderer failed".to_string(),
            })?;
        out.write_all(rendered.as_bytes())
            .and_then(|()| out.flush())
            .change_context(HealthCheckError::Render {
                message: "failed to write report".to_string(),
            })?;

        Ok(if report.healthy {
            ExitCode::Healthy
        } else {
            ExitCode::AnomaliesDetected
        })
    }
}

/// # Errors
///
/// - [`HealthCheckError::ProbeSetup`] if the command template is empty, NVML cannot
///   be loaded, or the NVML probe has no node name
pub fn build_probe(options: &ProbeOptions) -> Result<Arc<dyn GpuProbe>, Report<HealthCheckError>> {
    let setup_error = || HealthCheckError::ProbeSetup {
        message: format!("{:?} probe", options.gpu_probe),
    };

    let probe: Arc<dyn GpuProbe> = match options.gpu_probe {
        GpuProbeMode::Command => Arc::new(
            CommandProbe::from_template(&options.gpu_query_command)
                .change_context_lazy(setup_error)?,
        ),
        GpuProbeMode::Nvml => {
            let Some(node_name) = &options.node_name else {
                return Err(Report::new(HealthCheckError::ProbeSetup {
                    message: "the NVML probe needs --node-name or GPU_NODE_NAME".to_string(),
                }));
            };
            Arc::new(NvmlProbe::init(node_name.clone()).change_context_lazy(setup_error)?)
        }
        GpuProbeMode::None => Arc::new(NoopProbe),
    };
    Ok(probe)
}

/// Probe one node and print its samples as JSON.
pub async fn run_probe<W: Write>(
    args: &ProbeArgs,
    out: &mut W,
) -> Result<(), Report<HealthCheckError>> {
    let probe = build_probe(&args.probe)?;
    if !probe.covers(&args.node) {
        return Err(Report::new(HealthCheckError::ProbeSetup {
            message: format!(
                "{:?} probe does not cover node {}",
                args.probe.gpu_probe, args.node
            ),
        }));
    }

    let samples = probe
        .probe(&args.node)
        .await
        .change_context_lazy(|| HealthCheckError::ProbeSetup {
            message: format!("probing {} failed", args.node),
        })?;
    tracing::info!(node = %args.node, gpus = samples.len(), "probe finished");

    let mut json = serde_json::to_string_pretty(&samples).change_context(HealthCheckError::Render {
        message: "failed to serialize samples".to_string(),
    })?;
    json.push('\n');
    out.write_all(json.as_bytes())
        .change_context(HealthCheckError::Render {
            message: "failed to write samples".to_string(),
        })
}

/// Cancel `token` on SIGINT or SIGTERM.
pub fn spawn_signal_handler(token: CancellationToken) -> std::io::Result<JoinHandle<()>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::signal;
        use tokio::signal::unix::SignalKind;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        Ok(tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, cancelling collection");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT, cancelling collection");
                }
                _ = token.cancelled() => return,
            }
            token.cancel();
        }))
    }
    #[cfg(not(unix))]
    {
        Ok(tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        tracing::error!("Failed to listen for Ctrl+C: {e}");
                        return;
                    }
                    tracing::info!("Received Ctrl+C, cancelling collection");
                }
                _ = token.cancelled() => return,
            }
            token.cancel();
        }))
    }
}
