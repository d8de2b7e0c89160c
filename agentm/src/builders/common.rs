use crate::builder::{to_dynamic, ObjectBuilder};
use crate::errors::Error;
use crate::transform::{LABEL_COMPONENT, LABEL_INSTANCE, LABEL_NAME};

use agent_api as api;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::core::v1::EnvVar;
use k8s_openapi::api::core::v1::EnvVarSource;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::core::v1::SecretKeySelector;
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::ByteString;
use kube::api::DynamicObject;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

pub const AGENT_PORT: i32 = 42699;

pub const KEY: &str = "key";
pub const DOWNLOAD_KEY: &str = "downloadKey";
pub const CONFIGURATION_YAML: &str = "configuration.yaml";

pub fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
	name: Some(name.to_string()),
	namespace: Some(namespace.to_string()),
	..ObjectMeta::default()
    }
}

/*
 * Labels identifying the pods of a component, used both on pod templates and
 * in workload selectors.
 */
pub fn pod_labels(app: &str, instance: &str, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
	(LABEL_NAME.to_string(), app.to_string()),
	(LABEL_INSTANCE.to_string(), instance.to_string()),
	(LABEL_COMPONENT.to_string(), component.to_string()),
    ])
}

pub fn keys_secret_name(name: &str, backend: &api::BackendSpec) -> String {
    backend.keys_secret.clone().unwrap_or_else(|| name.to_string())
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
	name: name.to_string(),
	value: Some(value.into()),
	..EnvVar::default()
    }
}

fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
	name: name.to_string(),
	value_from: Some(EnvVarSource {
	    secret_key_ref: Some(SecretKeySelector {
		name: secret.to_string(),
		key: key.to_string(),
		optional: Some(key == DOWNLOAD_KEY),
	    }),
	    ..EnvVarSource::default()
	}),
	..EnvVar::default()
    }
}

/*
 * Environment shared by every agent container. User supplied variables come
 * last, in key order.
 */
pub fn agent_env(name: &str, backend: &api::BackendSpec, zone: Option<&str>) -> Vec<EnvVar> {
    let secret = keys_secret_name(name, backend);

    let mut vars = vec![
	secret_env("AGENT_KEY", &secret, KEY),
	secret_env("DOWNLOAD_KEY", &secret, DOWNLOAD_KEY),
    ];
    if let Some(host) = &backend.endpoint_host {
	vars.push(env("AGENT_ENDPOINT", host.as_str()));
    }
    if let Some(port) = &backend.endpoint_port {
	vars.push(env("AGENT_ENDPOINT_PORT", port.as_str()));
    }
    if let Some(zone) = zone {
	vars.push(env("AGENT_ZONE", zone));
    }
    for (key, value) in backend.env.iter().flatten() {
	vars.push(env(key, value.as_str()));
    }
    vars
}

pub struct ServiceAccountBuilder {
    namespace: String,
    name: String,
    component: String,
}

impl ServiceAccountBuilder {
    pub fn new(namespace: &str, name: &str, component: &str) -> Self {
	Self {
	    namespace: namespace.to_string(),
	    name: name.to_string(),
	    component: component.to_string(),
	}
    }
}

impl ObjectBuilder for ServiceAccountBuilder {

    fn component_name(&self) -> &str {
	&self.component
    }

    fn is_namespaced(&self) -> bool {
	true
    }

    fn build(&self) -> Result<Option<DynamicObject>, Error> {
	let account = ServiceAccount {
	    metadata: meta(&self.namespace, &self.name),
	    ..ServiceAccount::default()
	};
	Ok(Some(to_dynamic(&account)?))
    }
}

/*
 * Secret holding the agent keys. Not produced when the owner references a
 * Secret of its own.
 */
pub struct KeysSecretBuilder {
    namespace: String,
    name: String,
    component: String,
    backend: api::BackendSpec,
}

impl KeysSecretBuilder {
    pub fn new(namespace: &str, name: &str, component: &str, backend: &api::BackendSpec) -> Self {
	Self {
	    namespace: namespace.to_string(),
	    name: name.to_string(),
	    component: component.to_string(),
	    backend: backend.clone(),
	}
    }
}

impl ObjectBuilder for KeysSecretBuilder {

    fn component_name(&self) -> &str {
	&self.component
    }

    fn is_namespaced(&self) -> bool {
	true
    }

    fn build(&self) -> Result<Option<DynamicObject>, Error> {
	if self.backend.keys_secret.is_some() {
	    return Ok(None);
	}

	let key = self
	    .backend
	    .key
	    .as_ref()
	    .ok_or_else(|| Error::builder(&self.component, "either agent.key or agent.keysSecret must be set"))?;

	let mut data = BTreeMap::new();
	data.insert(KEY.to_string(), ByteString(key.as_bytes().to_vec()));
	if let Some(download_key) = &self.backend.download_key {
	    data.insert(DOWNLOAD_KEY.to_string(), ByteString(download_key.as_bytes().to_vec()));
	}

	let secret = Secret {
	    metadata: meta(&self.namespace, &self.name),
	    data: Some(data),
	    type_: Some(String::from("Opaque")),
	    ..Secret::default()
	};
	Ok(Some(to_dynamic(&secret)?))
    }
}

/*
 * ConfigMap with the agent configuration, mounted by the agent containers.
 */
pub struct AgentConfigMapBuilder {
    namespace: String,
    name: String,
    component: String,
    backend: api::BackendSpec,
    settings: BTreeMap<String, String>,
}

impl AgentConfigMapBuilder {
    pub fn new(namespace: &str, name: &str, component: &str, backend: &api::BackendSpec) -> Self {
	Self {
	    namespace: namespace.to_string(),
	    name: name.to_string(),
	    component: component.to_string(),
	    backend: backend.clone(),
	    settings: BTreeMap::new(),
	}
    }

    /* extra entries, e.g. the cluster name */
    pub fn with(mut self, key: &str, value: Option<&String>) -> Self {
	if let Some(value) = value {
	    self.settings.insert(key.to_string(), value.clone());
	}
	self
    }
}

impl ObjectBuilder for AgentConfigMapBuilder {

    fn component_name(&self) -> &str {
	&self.component
    }

    fn is_namespaced(&self) -> bool {
	true
    }

    fn build(&self) -> Result<Option<DynamicObject>, Error> {
	let mut data = self.settings.clone();
	data.insert(
	    CONFIGURATION_YAML.to_string(),
	    self.backend.configuration_yaml.clone().unwrap_or_default(),
	);

	let config_map = ConfigMap {
	    metadata: meta(&self.namespace, &self.name),
	    data: Some(data),
	    ..ConfigMap::default()
	};
	Ok(Some(to_dynamic(&config_map)?))
    }
}
