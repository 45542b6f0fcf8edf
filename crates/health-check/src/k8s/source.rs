use async_trait::async_trait;
use error_stack::Report;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::Api;
use kube::Client;
use kube::Resource;
use kube::ResourceExt;
use serde::de::DeserializeOwned;

use crate::k8s::nodes::node_condition;
use crate::k8s::nodes::NodeInfo;
use crate::k8s::workloads::TemplateKeys;
use crate::k8s::workloads::WorkloadInfo;
use crate::k8s::KubernetesError;
use crate::model::PodPlacement;

/// Items returned by a listing, plus entries that were recovered or dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing<T> {
    pub items: Vec<T>,
    /// One message per object that could not be described as-is.
    pub skipped: Vec<String>,
}

impl<T> From<Vec<T>> for Listing<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            items,
            skipped: Vec::new(),
        }
    }
}

/// Read access to the control plane, as needed by the collector.
#[async_trait]
pub trait ClusterSource: Send + Sync {
    async fn list_nodes(&self) -> Result<Listing<NodeInfo>, Report<KubernetesError>>;

    /// Deployments, daemonsets and statefulsets; `None` means all namespaces.
    async fn list_workloads(
        &self,
        namespace: Option<&str>,
    ) -> Result<Listing<WorkloadInfo>, Report<KubernetesError>>;

    async fn list_pod_placements(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<PodPlacement>, Report<KubernetesError>>;
}

/// Describe nodes; a node with an unreadable GPU quantity is kept with 0 GPUs.
pub fn describe_nodes(nodes: &[Node], gpu_resource: &str) -> Listing<NodeInfo> {
    let mut listing = Listing::from(Vec::with_capacity(nodes.len()));
    for node in nodes {
        match NodeInfo::from_node(node, gpu_resource) {
            Ok(info) => listing.items.push(info),
            Err(e) => {
                tracing::warn!("node has an invalid GPU quantity, counting 0 GPUs: {e:?}");
                let name = node.name_any();
                listing.skipped.push(format!(
                    "node {name} counted with 0 GPUs: {}",
                    e.current_context()
                ));
                listing.items.push(NodeInfo {
                    name,
                    condition: node_condition(node),
                    gpu_count: 0,
                });
            }
        }
    }
    listing
}

/// Describe workloads of one kind, dropping the ones that cannot be described.
pub fn describe_workloads<K>(
    items: &[K],
    keys: &TemplateKeys,
    describe: impl Fn(&K, &TemplateKeys) -> Result<WorkloadInfo, Report<KubernetesError>>,
) -> Listing<WorkloadInfo>
where
    K: Resource,
{
    let mut listing = Listing::from(Vec::with_capacity(items.len()));
    for item in items {
        match describe(item, keys) {
            Ok(info) => listing.items.push(info),
            Err(e) => {
                tracing::warn!("skipping workload: {e:?}");
                listing.skipped.push(format!(
                    "skipped {}/{}: {}",
                    item.namespace().unwrap_or_default(),
                    item.name_any(),
                    e.current_context()
                ));
            }
        }
    }
    listing
}

/// [`ClusterSource`] backed by the Kubernetes API.
pub struct KubeClusterSource {
    client: Client,
    keys: TemplateKeys,
}

impl KubeClusterSource {
    pub fn new(client: Client, keys: TemplateKeys) -> Self {
        Self { client, keys }
    }

    fn api<K>(&self, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    async fn list<K>(&self, api: Api<K>, action: &str) -> Result<Vec<K>, Report<KubernetesError>>
    where
        K: Resource + Clone + DeserializeOwned + std::fmt::Debug,
    {
        api.list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|e| Report::new(KubernetesError::classify(&e, action)))
    }
}

#[async_trait]
impl ClusterSource for KubeClusterSource {
    #[tracing::instrument(skip(self))]
    async fn list_nodes(&self) -> Result<Listing<NodeInfo>, Report<KubernetesError>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = self.list(api, "list nodes").await?;

        let listing = describe_nodes(&nodes, &self.keys.gpu_resource);
        tracing::debug!(count = listing.items.len(), "listed nodes");
        Ok(listing)
    }

    #[tracing::instrument(skip(self))]
    async fn list_workloads(
        &self,
        namespace: Option<&str>,
    ) -> Result<Listing<WorkloadInfo>, Report<KubernetesError>> {
        let (deployments, daemon_sets, stateful_sets) = futures::try_join!(
            self.list(self.api::<Deployment>(namespace), "list deployments"),
            self.list(self.api::<DaemonSet>(namespace), "list daemonsets"),
            self.list(self.api::<StatefulSet>(namespace), "list statefulsets"),
        )?;

        let mut listing = describe_workloads(&deployments, &self.keys, WorkloadInfo::from_deployment);
        for more in [
            describe_workloads(&daemon_sets, &self.keys, WorkloadInfo::from_daemon_set),
            describe_workloads(&stateful_sets, &self.keys, WorkloadInfo::from_stateful_set),
        ] {
            listing.items.extend(more.items);
            listing.skipped.extend(more.skipped);
        }

        tracing::debug!(
            count = listing.items.len(),
            skipped = listing.skipped.len(),
            "listed workloads"
        );
        Ok(listing)
    }

    #[tracing::instrument(skip(self))]
    async fn list_pod_placements(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<PodPlacement>, Report<KubernetesError>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| Report::new(KubernetesError::classify(&e, "list pods")))?;

        Ok(pods.items.iter().map(PodPlacement::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use k8s_openapi::api::core::v1::Container;
    use k8s_openapi::api::core::v1::NodeStatus as K8sNodeStatus;
    use k8s_openapi::api::core::v1::PodSpec;
    use k8s_openapi::api::core::v1::PodTemplateSpec;
    use k8s_openapi::api::core::v1::ResourceRequirements;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use kube::api::ObjectMeta;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::model::NodeCondition;

    fn gpus(quantity: &str) -> BTreeMap<String, Quantity> {
        BTreeMap::from([("nvidia.com/gpu".to_string(), Quantity(quantity.to_string()))])
    }

    fn node(name: &str, quantity: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(K8sNodeStatus {
                allocatable: Some(gpus(quantity)),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn deployment(name: &str, quantity: &str) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ollama".to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                template: PodTemplateSpec {
                    metadata: None,
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "ollama".to_string(),
                            resources: Some(ResourceRequirements {
                                limits: Some(gpus(quantity)),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            status: None,
        }
    }

    fn keys() -> TemplateKeys {
        TemplateKeys {
            gpu_resource: "nvidia.com/gpu".to_string(),
            parallelism_env: "OLLAMA_NUM_PARALLEL".to_string(),
        }
    }

    #[test]
    fn invalid_node_quantity_is_kept_and_reported() {
        let listing = describe_nodes(&[node("gpu-1", "2"), node("gpu-2", "0.5")], "nvidia.com/gpu");

        assert_eq!(
            listing.items.iter().map(|n| n.gpu_count).collect::<Vec<_>>(),
            vec![2, 0]
        );
        assert_eq!(listing.items[1].condition, NodeCondition::NotReady);
        assert_eq!(listing.skipped.len(), 1);
        assert!(listing.skipped[0].starts_with("node gpu-2 counted with 0 GPUs"));
    }

    #[test]
    fn undescribable_workload_is_reported() {
        let listing = describe_workloads(
            &[deployment("ollama", "1"), deployment("broken", "1500m")],
            &keys(),
            WorkloadInfo::from_deployment,
        );

        assert_eq!(listing.items.len(), 1);
        assert_eq!(listing.items[0].name, "ollama");
        assert_eq!(listing.skipped.len(), 1);
        assert!(listing.skipped[0].starts_with("skipped ollama/broken"));
    }
}
