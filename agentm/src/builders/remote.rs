use crate::builder::{to_dynamic, ObjectBuilder};
use crate::builders::common::{agent_env, meta, pod_labels, AgentConfigMapBuilder, KeysSecretBuilder, ServiceAccountBuilder, AGENT_PORT};
use crate::errors::Error;
use crate::owner::Owner;

use agent_api as api;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::apps::v1::DeploymentSpec;
use k8s_openapi::api::core::v1::ConfigMapVolumeSource;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::ContainerPort;
use k8s_openapi::api::core::v1::EnvVar;
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::api::core::v1::Volume;
use k8s_openapi::api::core::v1::VolumeMount;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::DynamicObject;
use kube::api::ObjectMeta;

pub const COMPONENT_REMOTE_AGENT: &str = "remote-agent";

pub fn remote_agent_builders(owner: &api::RemoteAgent) -> Result<Vec<Box<dyn ObjectBuilder>>, Error> {
    let namespace = owner.metadata.namespace.clone().ok_or(Error::MissingField("metadata.namespace"))?;
    let name = owner.metadata.name.clone().ok_or(Error::MissingField("metadata.name"))?;
    let spec = &owner.spec;

    let builders: Vec<Box<dyn ObjectBuilder>> = vec![
	Box::new(ServiceAccountBuilder::new(&namespace, &name, COMPONENT_REMOTE_AGENT)),
	Box::new(KeysSecretBuilder::new(&namespace, &name, COMPONENT_REMOTE_AGENT, &spec.agent)),
	Box::new(
	    AgentConfigMapBuilder::new(&namespace, &name, COMPONENT_REMOTE_AGENT, &spec.agent)
		.with("zone_name", spec.zone_name.as_ref())
		.with("hostname", spec.hostname.as_ref()),
	),
	Box::new(RemoteDeploymentBuilder {
	    namespace,
	    name,
	    spec: spec.clone(),
	}),
    ];

    Ok(builders)
}

struct RemoteDeploymentBuilder {
    namespace: String,
    name: String,
    spec: api::RemoteAgentSpec,
}

impl ObjectBuilder for RemoteDeploymentBuilder {

    fn component_name(&self) -> &str {
	COMPONENT_REMOTE_AGENT
    }

    fn is_namespaced(&self) -> bool {
	true
    }

    fn build(&self) -> Result<Option<DynamicObject>, Error> {
	let image = self.spec.agent.image();
	let labels = pod_labels(api::RemoteAgent::APP_NAME, &self.name, COMPONENT_REMOTE_AGENT);

	let mut env = agent_env(&self.name, &self.spec.agent, self.spec.zone_name.as_deref());
	if let Some(hostname) = &self.spec.hostname {
	    env.push(EnvVar {
		name: String::from("AGENT_REMOTE_HOST"),
		value: Some(hostname.clone()),
		..EnvVar::default()
	    });
	}

	let deployment = Deployment {
	    metadata: meta(&self.namespace, &self.name),
	    spec: Some(DeploymentSpec {
		replicas: Some(self.spec.replicas.unwrap_or(1)),
		selector: LabelSelector {
		    match_labels: Some(labels.clone()),
		    ..LabelSelector::default()
		},
		template: PodTemplateSpec {
		    metadata: Some(ObjectMeta {
			labels: Some(labels),
			..ObjectMeta::default()
		    }),
		    spec: Some(PodSpec {
			service_account_name: Some(self.name.clone()),
			containers: vec![Container {
			    name: COMPONENT_REMOTE_AGENT.to_string(),
			    image: Some(image.reference(api::agent::DEFAULT_AGENT_IMAGE)),
			    image_pull_policy: Some(image.pull_policy()),
			    env: Some(env),
			    ports: Some(vec![ContainerPort {
				name: Some(String::from("agent-apis")),
				container_port: AGENT_PORT,
				..ContainerPort::default()
			    }]),
			    volume_mounts: Some(vec![VolumeMount {
				name: String::from("configuration"),
				mount_path: String::from("/opt/agent/etc/runfc"),
				..VolumeMount::default()
			    }]),
			    ..Container::default()
			}],
			volumes: Some(vec![Volume {
			    name: String::from("configuration"),
			    config_map: Some(ConfigMapVolumeSource {
				name: self.name.clone(),
				..ConfigMapVolumeSource::default()
			    }),
			    ..Volume::default()
			}]),
			..PodSpec::default()
		    }),
		},
		..DeploymentSpec::default()
	    }),
	    ..Deployment::default()
	};
	Ok(Some(to_dynamic(&deployment)?))
    }
}
