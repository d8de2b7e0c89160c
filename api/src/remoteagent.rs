use kube_derive::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::agent::BackendSpec;
use crate::status::AgentStatus;

/*
 * A RemoteAgent runs a single agent Deployment that monitors a host outside of
 * the cluster.
 */
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(group = "runfc.br", version = "v1alpha", kind = "RemoteAgent", namespaced)]
#[kube(status = "AgentStatus", shortname = "ragt")]
#[serde(rename_all = "camelCase")]
pub struct RemoteAgentSpec {

    pub zone_name: Option<String>,

    /* Host the remote agent is monitoring */
    pub hostname: Option<String>,

    pub agent: BackendSpec,

    pub replicas: Option<i32>,
}
