//! Concurrent collection of node, workload and GPU state.
//!
//! Every query runs in its own task, bounded by one overall deadline and a
//! cancellation token. Tasks never share state: each returns its own result
//! and the snapshot is assembled once all of them have finished.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use futures::future::join_all;
use tokio::time::timeout_at;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::HealthCheckError;
use crate::gpu::GpuProbe;
use crate::k8s::ClusterSource;
use crate::k8s::KubernetesError;
use crate::k8s::NodeInfo;
use crate::k8s::WorkloadInfo;
use crate::model::ClusterSnapshot;
use crate::model::NodeStatus;
use crate::model::Reachability;
use crate::model::WorkloadStatus;

const CANCELLED_ISSUE: &str = "collection cancelled";

/// How a single bounded query ended.
#[derive(Debug)]
enum QueryOutcome<T, E> {
    Done(Result<T, E>),
    TimedOut,
    Cancelled,
}

async fn bounded<F, T, E>(
    query: F,
    deadline: Instant,
    token: &CancellationToken,
) -> QueryOutcome<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => QueryOutcome::Cancelled,
        result = timeout_at(deadline, query) => match result {
            Ok(result) => QueryOutcome::Done(result),
            Err(_) => QueryOutcome::TimedOut,
        },
    }
}

pub struct MetricsCollector {
    source: Arc<dyn ClusterSource>,
    probe: Arc<dyn GpuProbe>,
    /// Empty means all namespaces.
    namespaces: Vec<String>,
    timeout: Duration,
}

impl MetricsCollector {
    pub fn new(
        source: Arc<dyn ClusterSource>,
        probe: Arc<dyn GpuProbe>,
        namespaces: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            probe,
            namespaces,
            timeout,
        }
    }

    /// Collect one snapshot of the cluster.
    ///
    /// # Errors
    ///
    /// - [`HealthCheckError::AuthError`] if the control plane rejects the credentials
    /// - [`HealthCheckError::CollectionTimeout`] if no initial listing answered in time
    #[tracing::instrument(skip_all, fields(namespaces = ?self.namespaces, timeout = ?self.timeout))]
    pub async fn collect(
        &self,
        token: &CancellationToken,
    ) -> Result<ClusterSnapshot, Report<HealthCheckError>> {
        let deadline = Instant::now() + self.timeout;
        let mut snapshot = ClusterSnapshot::default();

        let (node_infos, workload_infos) = self.list_initial(deadline, token, &mut snapshot).await?;
        // listed entries still get a status; their tasks see the cancelled token
        if token.is_cancelled() {
            tracing::warn!("collection cancelled during initial listing");
        }

        tracing::info!(
            nodes = node_infos.len(),
            workloads = workload_infos.len(),
            "probing nodes and workloads"
        );

        let node_tasks: Vec<_> = node_infos
            .into_iter()
            .map(|info| {
                let probe = self.probe.clone();
                let token = token.clone();
                tokio::spawn(async move { probe_node(info, probe, deadline, token).await })
            })
            .collect();

        let workload_tasks: Vec<_> = workload_infos
            .into_iter()
            .map(|info| {
                let source = self.source.clone();
                let token = token.clone();
                tokio::spawn(async move { place_workload(info, source, deadline, token).await })
            })
            .collect();

        // single collecting point
        let (node_results, workload_results) =
            futures::join!(join_all(node_tasks), join_all(workload_tasks));

        for result in node_results {
            match result {
                Ok(node) => snapshot.nodes.push(node),
                Err(e) => snapshot.issues.push(format!("node task failed: {e}")),
            }
        }

        for result in workload_results {
            match result {
                Ok(Ok(workload)) => snapshot.workloads.push(workload),
                Ok(Err(auth)) => {
                    return Err(auth.change_context(HealthCheckError::AuthError {
                        message: "pod listing was rejected".to_string(),
                    }))
                }
                Err(e) => snapshot.issues.push(format!("workload task failed: {e}")),
            }
        }

        if token.is_cancelled() {
            snapshot.cancelled = true;
            snapshot.issues.push(CANCELLED_ISSUE.to_string());
        }

        snapshot.nodes.sort_by(|a, b| a.name.cmp(&b.name));
        snapshot
            .workloads
            .sort_by(|a, b| (&a.namespace, a.kind, &a.name).cmp(&(&b.namespace, b.kind, &b.name)));

        tracing::info!(
            nodes = snapshot.nodes.len(),
            workloads = snapshot.workloads.len(),
            partial = snapshot.is_partial(),
            "collection finished"
        );
        Ok(snapshot)
    }

    /// List nodes and per-namespace workloads concurrently.
    ///
    /// Failures other than authentication become snapshot issues, and whatever
    /// answered before a cancellation is kept.
    async fn list_initial(
        &self,
        deadline: Instant,
        token: &CancellationToken,
        snapshot: &mut ClusterSnapshot,
    ) -> Result<(Vec<NodeInfo>, Vec<WorkloadInfo>), Report<HealthCheckError>> {
        let namespaces: Vec<Option<&str>> = if self.namespaces.is_empty() {
            vec![None]
        } else {
            self.namespaces.iter().map(|ns| Some(ns.as_str())).collect()
        };

        let nodes_query = bounded(self.source.list_nodes(), deadline, token);
        let workload_queries = join_all(namespaces.iter().map(|namespace| {
            bounded(self.source.list_workloads(*namespace), deadline, token)
        }));
        let (nodes_outcome, workload_outcomes) = futures::join!(nodes_query, workload_queries);

        let mut answered = 0;
        let mut cancelled = false;
        let mut node_infos = Vec::new();
        match nodes_outcome {
            QueryOutcome::Done(Ok(listing)) => {
                answered += 1;
                node_infos = listing.items;
                snapshot.issues.extend(listing.skipped);
            }
            QueryOutcome::Done(Err(e)) => {
                answered += 1;
                check_auth(&e)?;
                tracing::warn!("node listing failed: {e:?}");
                snapshot.nodes_listed = false;
                snapshot.issues.push(format!("node listing failed: {}", e.current_context()));
            }
            QueryOutcome::TimedOut => {
                snapshot.nodes_listed = false;
                snapshot.issues.push("node listing timed out".to_string());
            }
            QueryOutcome::Cancelled => {
                snapshot.nodes_listed = false;
                cancelled = true;
            }
        }

        let mut workload_infos = Vec::new();
        for (namespace, outcome) in namespaces.iter().zip(workload_outcomes) {
            let scope = namespace.map_or_else(|| "all namespaces".to_string(), |ns| format!("namespace {ns}"));
            match outcome {
                QueryOutcome::Done(Ok(listing)) => {
                    answered += 1;
                    workload_infos.extend(listing.items);
                    snapshot.issues.extend(listing.skipped);
                }
                QueryOutcome::Done(Err(e)) => {
                    answered += 1;
                    check_auth(&e)?;
                    tracing::warn!("workload listing failed in {scope}: {e:?}");
                    snapshot.issues.push(format!(
                        "workload listing failed in {scope}: {}",
                        e.current_context()
                    ));
                }
                QueryOutcome::TimedOut => {
                    snapshot.issues.push(format!("workload listing timed out in {scope}"));
                }
                QueryOutcome::Cancelled => cancelled = true,
            }
        }

        if !cancelled && answered == 0 {
            return Err(Report::new(HealthCheckError::CollectionTimeout {
                timeout: self.timeout,
            }));
        }

        Ok((node_infos, workload_infos))
    }
}

fn check_auth(err: &Report<KubernetesError>) -> Result<(), Report<HealthCheckError>> {
    if err.current_context().is_unauthorized() {
        return Err(Report::new(HealthCheckError::AuthError {
            message: err.current_context().to_string(),
        }));
    }
    Ok(())
}

#[tracing::instrument(skip_all, fields(node = %info.name))]
async fn probe_node(
    info: NodeInfo,
    probe: Arc<dyn GpuProbe>,
    deadline: Instant,
    token: CancellationToken,
) -> NodeStatus {
    let mut status = NodeStatus {
        name: info.name,
        condition: info.condition,
        reachability: Reachability::NotProbed,
        gpu_count: info.gpu_count,
        gpu_samples: Vec::new(),
    };

    if !probe.covers(&status.name) {
        return status;
    }

    status.reachability = match bounded(probe.probe(&status.name), deadline, &token).await {
        QueryOutcome::Done(Ok(samples)) => {
            status.gpu_samples = samples;
            Reachability::Reachable
        }
        QueryOutcome::Done(Err(e)) => {
            tracing::warn!("GPU probe failed: {e:?}");
            Reachability::Unreachable {
                reason: e.current_context().to_string(),
            }
        }
        QueryOutcome::TimedOut => Reachability::Unreachable {
            reason: "telemetry query timed out".to_string(),
        },
        QueryOutcome::Cancelled => Reachability::Unreachable {
            reason: "telemetry query cancelled".to_string(),
        },
    };
    status
}

/// Look up pod placement; only an authorization failure is returned as an error.
#[tracing::instrument(skip_all, fields(workload = %format!("{}/{}", info.namespace, info.name)))]
async fn place_workload(
    info: WorkloadInfo,
    source: Arc<dyn ClusterSource>,
    deadline: Instant,
    token: CancellationToken,
) -> Result<WorkloadStatus, Report<KubernetesError>> {
    let mut status = WorkloadStatus {
        kind: info.kind,
        name: info.name,
        namespace: info.namespace,
        desired_replicas: info.desired_replicas,
        ready_replicas: info.ready_replicas,
        gpus_per_replica: info.gpus_per_replica,
        parallelism: info.parallelism,
        placements: None,
        placement_error: None,
    };

    let Some(selector) = info.selector else {
        status.placements = Some(Vec::new());
        return Ok(status);
    };

    let query = source.list_pod_placements(&status.namespace, &selector);
    match bounded(query, deadline, &token).await {
        QueryOutcome::Done(Ok(placements)) => status.placements = Some(placements),
        QueryOutcome::Done(Err(e)) if e.current_context().is_unauthorized() => return Err(e),
        QueryOutcome::Done(Err(e)) => {
            tracing::warn!("pod listing failed: {e:?}");
            status.placement_error = Some(e.current_context().to_string());
        }
        QueryOutcome::TimedOut => status.placement_error = Some("pod query timed out".to_string()),
        QueryOutcome::Cancelled => {
            status.placement_error = Some("pod query cancelled".to_string())
        }
    }
    Ok(status)
}
