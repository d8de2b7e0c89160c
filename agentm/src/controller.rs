use crate::builders::{AgentBuilders, BuilderSource, RemoteAgentBuilders};
use crate::client::{ApplyClient, KubeApplyClient};
use crate::config::Config;
use crate::errors::Error;
use crate::legacy::{HelmReleaseCleanup, LegacyUninstaller};
use crate::owner::{owner_key, Owner};
use crate::reconciler::Reconciler;

use agent_api as api;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::core::v1::ServiceAccount;
use kube::Api as KubeApi;
use kube::Client as KubeClient;
use kube::runtime::controller::Action as KubeAction;
use kube::runtime::controller::Controller as KubeController;
use kube::runtime::watcher::Config as KubeWatcherConfig;
use log;
use std::future::Future;
use std::sync::Arc;

/*
 * AgentManager wires the Agent and RemoteAgent reconcilers into kube
 * controllers that also watch the dependents they own.
 */
#[derive(Clone)]
pub struct AgentManager {
    kube_client: KubeClient,
    config: Arc<Config>,
    agents: Arc<Reconciler<api::Agent>>,
    remote_agents: Arc<Reconciler<api::RemoteAgent>>,
}

struct AgentManagerCtx<K: Owner> {
    reconciler: Arc<Reconciler<K>>,
    config: Arc<Config>,
}

async fn reconcile<K: Owner>(owner: Arc<K>, ctx: Arc<AgentManagerCtx<K>>) -> Result<KubeAction, Error> {
    let namespace = owner.meta().namespace.clone().unwrap_or_default();
    let name = owner.meta().name.clone().ok_or(Error::MissingField("metadata.name"))?;

    ctx.reconciler.reconcile(&namespace, &name).await
}

fn error_policy<K: Owner>(owner: Arc<K>, error: &Error, ctx: Arc<AgentManagerCtx<K>>) -> KubeAction {
    log::warn!("Requeueing {} after error: {}", owner_key(owner.as_ref()), error);
    KubeAction::requeue(ctx.config.error_requeue())
}

impl AgentManager {

    pub fn new(kube_client: KubeClient, config: Arc<Config>) -> Self {
	let client: Arc<dyn ApplyClient> = Arc::new(KubeApplyClient::new(kube_client.clone(), &config.field_manager));
	let legacy: Arc<dyn LegacyUninstaller> = Arc::new(HelmReleaseCleanup::new(client.clone()));

	let agent_builders: Arc<dyn BuilderSource<api::Agent>> = Arc::new(AgentBuilders::new(client.clone()));
	let remote_builders: Arc<dyn BuilderSource<api::RemoteAgent>> = Arc::new(RemoteAgentBuilders);

	Self {
	    kube_client,
	    agents: Arc::new(Reconciler::new(client.clone(), agent_builders, legacy.clone(), config.clone())),
	    remote_agents: Arc::new(Reconciler::new(client, remote_builders, legacy, config.clone())),
	    config,
	}
    }

    fn controller<K: Owner>(&self, reconciler: Arc<Reconciler<K>>) -> impl Future<Output = ()> {
	let ctx = Arc::new(AgentManagerCtx {
	    reconciler,
	    config: self.config.clone(),
	});
	let client = self.kube_client.clone();

	KubeController::new(KubeApi::<K>::all(client.clone()), KubeWatcherConfig::default())
	    .owns(KubeApi::<DaemonSet>::all(client.clone()), KubeWatcherConfig::default())
	    .owns(KubeApi::<Deployment>::all(client.clone()), KubeWatcherConfig::default())
	    .owns(KubeApi::<ConfigMap>::all(client.clone()), KubeWatcherConfig::default())
	    .owns(KubeApi::<Secret>::all(client.clone()), KubeWatcherConfig::default())
	    .owns(KubeApi::<Service>::all(client.clone()), KubeWatcherConfig::default())
	    .owns(KubeApi::<ServiceAccount>::all(client), KubeWatcherConfig::default())
	    .run(reconcile::<K>, error_policy::<K>, ctx)
	    .for_each(|reconcile| async move {
		match reconcile {
		    Ok((obj, _)) => log::debug!("Reconcile of {} finished", obj),
		    Err(err) => log::error!("Reconcile failed: {}", err),
		}
	    })
    }

    pub fn agent_controller(&self) -> impl Future<Output = ()> {
	self.controller(self.agents.clone())
    }

    pub fn remote_agent_controller(&self) -> impl Future<Output = ()> {
	self.controller(self.remote_agents.clone())
    }
}
