//! `HealthProbe` implementation backed by the Kubernetes API.
//!
//! Counts `Running` replicas of the primary workload by label selector,
//! the same approach as the original controller's
//! `HealthChecker.check_cloudflared_pods_healthy`.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::Client;

use failover_core::HealthProbe;

/// Reports the primary path healthy iff at least `min_replicas` pods
/// matching `label_selector` in `namespace` are in the `Running` phase.
///
/// # Trust Level: Semi-Trusted
///
/// Reaches into the cluster API. Any error (connection failure, RBAC
/// denial, namespace not found) is treated as "not healthy" — never
/// propagated — per `failover_core::health::HealthProbe`'s fail-closed
/// contract.
pub struct KubernetesHealthProbe {
    client: Client,
    namespace: String,
    label_selector: String,
    min_replicas: u32,
}

impl KubernetesHealthProbe {
    pub fn new(client: Client, namespace: String, label_selector: String, min_replicas: u32) -> Self {
        Self {
            client,
            namespace,
            label_selector,
            min_replicas,
        }
    }

    /// Construct against the in-cluster (or kubeconfig-resolved) default client.
    pub async fn try_default(
        namespace: String,
        label_selector: String,
        min_replicas: u32,
    ) -> anyhow::Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, namespace, label_selector, min_replicas))
    }

    async fn count_running_pods(&self) -> kube::Result<usize> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let params = ListParams::default().labels(&self.label_selector);
        let list = pods.list(&params).await?;

        let running = list
            .items
            .iter()
            .filter(|pod| {
                pod.status
                    .as_ref()
                    .and_then(|s| s.phase.as_deref())
                    .map(|phase| phase == "Running")
                    .unwrap_or(false)
            })
            .count();

        Ok(running)
    }
}

#[async_trait]
impl HealthProbe for KubernetesHealthProbe {
    async fn primary_healthy(&self) -> bool {
        match self.count_running_pods().await {
            Ok(running) => {
                let healthy = running as u32 >= self.min_replicas;
                if !healthy {
                    tracing::warn!(
                        running,
                        min_replicas = self.min_replicas,
                        namespace = %self.namespace,
                        selector = %self.label_selector,
                        "primary workload below healthy replica threshold"
                    );
                }
                healthy
            }
            Err(err) => {
                tracing::warn!(error = %err, "kubernetes health probe failed, reporting unhealthy");
                false
            }
        }
    }
}
