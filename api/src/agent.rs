use kube_derive::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::status::AgentStatus;

pub const DEFAULT_AGENT_IMAGE: &str = "icr.io/instana/agent";
pub const DEFAULT_K8SENSOR_IMAGE: &str = "icr.io/instana/k8sensor";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {

    /* Registry and repository, without tag */
    pub name: Option<String>,

    pub tag: Option<String>,

    pub pull_policy: Option<String>,
}

impl ImageSpec {

    /*
     * Returns `name:tag`, falling back to `default_name` and `latest` when the
     * fields are not set.
     */
    pub fn reference(&self, default_name: &str) -> String {
	let name = self.name.as_deref().unwrap_or(default_name);
	let tag = self.tag.as_deref().unwrap_or("latest");

	format!("{}:{}", name, tag)
    }

    pub fn pull_policy(&self) -> String {
	match &self.pull_policy {
	    Some(policy) => policy.clone(),
	    None => String::from("Always"),
	}
    }
}

/*
 * Connection settings towards the backend the agents report to, shared by the
 * Agent and the RemoteAgent resources.
 */
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackendSpec {

    pub endpoint_host: Option<String>,

    pub endpoint_port: Option<String>,

    /* Agent key, rendered into a Secret owned by the resource */
    pub key: Option<String>,

    pub download_key: Option<String>,

    /*
     * Name of an existing Secret holding `key` and `downloadKey`. When set,
     * no keys Secret is produced.
     */
    pub keys_secret: Option<String>,

    pub image: Option<ImageSpec>,

    /* Raw configuration.yaml handed to the agent */
    pub configuration_yaml: Option<String>,

    pub env: Option<BTreeMap<String, String>>,
}

impl BackendSpec {

    pub fn image(&self) -> ImageSpec {
	self.image.clone().unwrap_or_default()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ZoneSpec {

    pub name: String,

    pub node_selector: Option<BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {

    /* A Service in front of the agents is only created when explicitly enabled */
    pub create: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EtcdSpec {

    /* Explicit metrics targets; disables discovery when non-empty */
    pub targets: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct K8sSensorSpec {

    pub enabled: Option<bool>,

    pub replicas: Option<i32>,

    pub image: Option<ImageSpec>,

    pub etcd: Option<EtcdSpec>,
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(group = "runfc.br", version = "v1alpha", kind = "Agent", namespaced)]
#[kube(status = "AgentStatus", shortname = "agt")]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {

    pub cluster_name: Option<String>,

    pub zone_name: Option<String>,

    pub agent: BackendSpec,

    /*
     * When non-empty, one agent DaemonSet is produced per zone instead of a
     * single one.
     */
    pub zones: Option<Vec<ZoneSpec>>,

    pub service: Option<ServiceSpec>,

    pub k8s_sensor: Option<K8sSensorSpec>,

    /* Overrides OpenShift detection */
    pub openshift: Option<bool>,
}

impl AgentSpec {

    pub fn service_enabled(&self) -> bool {
	matches!(&self.service, Some(ServiceSpec { create: Some(true) }))
    }

    pub fn k8s_sensor(&self) -> K8sSensorSpec {
	self.k8s_sensor.clone().unwrap_or_default()
    }

    pub fn k8s_sensor_enabled(&self) -> bool {
	self.k8s_sensor().enabled.unwrap_or(true)
    }

    /*
     * Returns the explicitly configured ETCD targets, if any.
     */
    pub fn etcd_targets(&self) -> Vec<String> {
	self.k8s_sensor()
	    .etcd
	    .and_then(|etcd| etcd.targets)
	    .unwrap_or_default()
    }

    pub fn zones(&self) -> Vec<ZoneSpec> {
	self.zones.clone().unwrap_or_default()
    }
}
