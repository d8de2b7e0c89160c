use crate::client::ApplyClient;
use crate::dependent::DependentRef;
use crate::errors::Error;
use crate::multierror::MultiErrorBuilder;

use async_trait::async_trait;
use log;
use std::sync::Arc;

/*
 * Removes what an older, Helm based installation left behind for a release.
 */
#[async_trait]
pub trait LegacyUninstaller: Send + Sync {
    async fn uninstall(&self, namespace: &str, release: &str) -> Result<(), Error>;
}

pub struct HelmReleaseCleanup {
    client: Arc<dyn ApplyClient>,
}

/* objects the agent chart names after its release */
const NAMESPACED: &[(&str, &str)] = &[
    ("apps/v1", "DaemonSet"),
    ("apps/v1", "Deployment"),
    ("v1", "ServiceAccount"),
    ("v1", "ConfigMap"),
    ("v1", "Secret"),
    ("v1", "Service"),
];

const CLUSTER_SCOPED: &[(&str, &str)] = &[
    ("rbac.authorization.k8s.io/v1", "ClusterRole"),
    ("rbac.authorization.k8s.io/v1", "ClusterRoleBinding"),
];

impl HelmReleaseCleanup {

    pub fn new(client: Arc<dyn ApplyClient>) -> Self {
	Self { client }
    }

    async fn release_storage(&self, namespace: &str, release: &str) -> Result<Vec<DependentRef>, Error> {
	let template = DependentRef::new("v1", "Secret", Some(namespace), "");
	let selector = format!("owner=helm,name={}", release);

	self.client.list(&template, &selector).await
    }
}

#[async_trait]
impl LegacyUninstaller for HelmReleaseCleanup {

    async fn uninstall(&self, namespace: &str, release: &str) -> Result<(), Error> {
	log::info!("Uninstalling legacy release {}/{}", namespace, release);

	let mut targets = self.release_storage(namespace, release).await?;
	for (api_version, kind) in NAMESPACED {
	    targets.push(DependentRef::new(api_version, kind, Some(namespace), release));
	}
	for (api_version, kind) in CLUSTER_SCOPED {
	    targets.push(DependentRef::new(api_version, kind, None, release));
	}

	let mut errors = MultiErrorBuilder::new();
	for target in &targets {
	    if let Err(err) = self.client.delete(target).await {
		log::error!("Failed to delete legacy object {}: {}", target, err);
		errors.add_err(err);
	    }
	}
	errors.build()
    }
}
