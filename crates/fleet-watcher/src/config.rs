//! Cluster connectivity configuration.
//!
//! One descriptor per cluster the manager should mirror; each resolves
//! to client credentials when the manager connects.

use std::collections::BTreeMap;

use kube::config::KubeConfigOptions;

/// How to reach one cluster.
#[derive(Debug, Clone)]
pub enum ClusterConnection {
    /// Service-account credentials of the pod the process runs in.
    InCluster,
    /// Named context from the ambient kubeconfig.
    KubeconfigContext(String),
    /// Fully resolved client configuration.
    Explicit(Box<kube::Config>),
}

/// One connection descriptor per cluster, keyed by cluster name.
pub type ClusterConfigMap = BTreeMap<String, ClusterConnection>;

impl ClusterConnection {
    pub(crate) async fn load(&self) -> Result<kube::Config, Box<dyn std::error::Error + Send + Sync>> {
        match self {
            Self::InCluster => Ok(kube::Config::incluster()?),
            Self::KubeconfigContext(context) => {
                let options = KubeConfigOptions {
                    context: Some(context.clone()),
                    ..Default::default()
                };
                Ok(kube::Config::from_kubeconfig(&options).await?)
            }
            Self::Explicit(config) => Ok((**config).clone()),
        }
    }
}
