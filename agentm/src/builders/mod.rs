/*
 * Object builders for the Agent and RemoteAgent resources.
 */
pub mod agent;
pub mod common;
pub mod remote;

use crate::builder::ObjectBuilder;
use crate::client::ApplyClient;
use crate::discovery;
use crate::errors::Error;
use crate::owner::Owner;

use agent_api as api;

use async_trait::async_trait;
use std::sync::Arc;

/*
 * BuilderSource hands the engine the ordered builders for one owner. It may
 * look at the cluster first, e.g. to discover ETCD.
 */
#[async_trait]
pub trait BuilderSource<K: Owner>: Send + Sync {
    async fn builders(&self, owner: &K) -> Result<Vec<Box<dyn ObjectBuilder>>, Error>;
}

pub struct AgentBuilders {
    client: Arc<dyn ApplyClient>,
}

impl AgentBuilders {
    pub fn new(client: Arc<dyn ApplyClient>) -> Self {
	Self { client }
    }
}

#[async_trait]
impl BuilderSource<api::Agent> for AgentBuilders {

    async fn builders(&self, owner: &api::Agent) -> Result<Vec<Box<dyn ObjectBuilder>>, Error> {
	let openshift = discovery::is_openshift(self.client.as_ref(), owner.spec.openshift).await;

	let etcd = match (openshift, owner.spec.k8s_sensor_enabled(), owner.metadata.namespace.as_deref()) {
	    (false, true, Some(namespace)) => {
		discovery::discover_etcd(self.client.as_ref(), namespace, &owner.spec.etcd_targets()).await
	    }
	    _ => None,
	};

	agent::agent_builders(owner, openshift, etcd)
    }
}

pub struct RemoteAgentBuilders;

#[async_trait]
impl BuilderSource<api::RemoteAgent> for RemoteAgentBuilders {

    async fn builders(&self, owner: &api::RemoteAgent) -> Result<Vec<Box<dyn ObjectBuilder>>, Error> {
	remote::remote_agent_builders(owner)
    }
}
