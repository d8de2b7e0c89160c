use crate::builders::agent::{COMPONENT_AGENT, COMPONENT_K8SENSOR};
use crate::builders::remote::COMPONENT_REMOTE_AGENT;
use crate::dependent::DependentRef;
use crate::errors::Error;
use crate::status::{Workload, WorkloadKind, CONDITION_ALL_AGENTS_AVAILABLE, CONDITION_ALL_K8S_SENSORS_AVAILABLE};

use agent_api as api;

use kube::api::DynamicObject;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/*
 * Owner is implemented by the custom resources the engine reconciles.
 */
pub trait Owner:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /* value of `app.kubernetes.io/name` on every dependent */
    const APP_NAME: &'static str;

    fn status(&self) -> Option<&api::AgentStatus>;

    /* workloads whose availability is published on the status */
    fn workloads(&self) -> Vec<Workload>;
}

impl Owner for api::Agent {
    const APP_NAME: &'static str = "agent";

    fn status(&self) -> Option<&api::AgentStatus> {
	self.status.as_ref()
    }

    fn workloads(&self) -> Vec<Workload> {
	let mut workloads = vec![Workload {
	    condition: CONDITION_ALL_AGENTS_AVAILABLE,
	    subject: "Agents",
	    kind: WorkloadKind::DaemonSet,
	    component: COMPONENT_AGENT,
	}];
	if self.spec.k8s_sensor_enabled() {
	    workloads.push(Workload {
		condition: CONDITION_ALL_K8S_SENSORS_AVAILABLE,
		subject: "K8sSensors",
		kind: WorkloadKind::Deployment,
		component: COMPONENT_K8SENSOR,
	    });
	}
	workloads
    }
}

impl Owner for api::RemoteAgent {
    const APP_NAME: &'static str = "agent-remote";

    fn status(&self) -> Option<&api::AgentStatus> {
	self.status.as_ref()
    }

    fn workloads(&self) -> Vec<Workload> {
	vec![Workload {
	    condition: CONDITION_ALL_AGENTS_AVAILABLE,
	    subject: "Agents",
	    kind: WorkloadKind::Deployment,
	    component: COMPONENT_REMOTE_AGENT,
	}]
    }
}

pub fn owner_ref<K: Owner>(owner: &K) -> Result<DependentRef, Error> {
    let name = owner.meta().name.as_deref().ok_or(Error::MissingField("metadata.name"))?;
    Ok(DependentRef::of::<K>(owner.meta().namespace.as_deref(), name))
}

/* `namespace/name`, used to tag log lines */
pub fn owner_key<K: Owner>(owner: &K) -> String {
    format!(
	"{}/{}",
	owner.meta().namespace.as_deref().unwrap_or_default(),
	owner.meta().name.as_deref().unwrap_or_default()
    )
}

pub fn from_dynamic<T: DeserializeOwned>(obj: DynamicObject) -> Result<T, Error> {
    let value = serde_json::to_value(obj)?;
    Ok(serde_json::from_value(value)?)
}
