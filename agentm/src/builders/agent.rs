use crate::builder::{to_dynamic, ObjectBuilder};
use crate::builders::common::{agent_env, meta, pod_labels, AgentConfigMapBuilder, KeysSecretBuilder, ServiceAccountBuilder, AGENT_PORT};
use crate::discovery::EtcdDiscovery;
use crate::errors::Error;
use crate::owner::Owner;

use agent_api as api;

use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::apps::v1::DaemonSetSpec;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::apps::v1::DeploymentSpec;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::core::v1::ConfigMapVolumeSource;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::ContainerPort;
use k8s_openapi::api::core::v1::EnvVar;
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::core::v1::ServicePort;
use k8s_openapi::api::core::v1::ServiceSpec as KubeServiceSpec;
use k8s_openapi::api::core::v1::Volume;
use k8s_openapi::api::core::v1::VolumeMount;
use k8s_openapi::api::rbac::v1::ClusterRole;
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use k8s_openapi::api::rbac::v1::PolicyRule;
use k8s_openapi::api::rbac::v1::RoleRef;
use k8s_openapi::api::rbac::v1::Subject;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::DynamicObject;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const COMPONENT_AGENT: &str = "agent";
pub const COMPONENT_K8SENSOR: &str = "k8sensor";

const ZONE_LABEL: &str = "agent.runfc.br/zone";
const CONFIG_VOLUME: &str = "configuration";
const CONFIG_PATH: &str = "/opt/agent/etc/runfc";

/*
 * What the Agent builders share: the owner plus the facts discovered about
 * the cluster before building.
 */
struct AgentContext {
    owner: api::Agent,
    namespace: String,
    name: String,
    openshift: bool,
    etcd: Option<EtcdDiscovery>,
}

impl AgentContext {

    fn labels(&self, component: &str) -> BTreeMap<String, String> {
	pod_labels(api::Agent::APP_NAME, &self.name, component)
    }

    fn cluster_wide_name(&self) -> String {
	format!("{}-{}", self.namespace, self.name)
    }

    fn k8sensor_name(&self) -> String {
	format!("{}-{}", self.name, COMPONENT_K8SENSOR)
    }
}

/*
 * Builders for every dependent of an Agent, in apply order.
 */
pub fn agent_builders(
    owner: &api::Agent,
    openshift: bool,
    etcd: Option<EtcdDiscovery>,
) -> Result<Vec<Box<dyn ObjectBuilder>>, Error> {
    let namespace = owner.metadata.namespace.clone().ok_or(Error::MissingField("metadata.namespace"))?;
    let name = owner.metadata.name.clone().ok_or(Error::MissingField("metadata.name"))?;

    let spec = &owner.spec;
    let mut builders: Vec<Box<dyn ObjectBuilder>> = vec![
	Box::new(ServiceAccountBuilder::new(&namespace, &name, COMPONENT_AGENT)),
	Box::new(
	    AgentConfigMapBuilder::new(&namespace, &name, COMPONENT_AGENT, &spec.agent)
		.with("cluster_name", spec.cluster_name.as_ref())
		.with("zone_name", spec.zone_name.as_ref()),
	),
	Box::new(KeysSecretBuilder::new(&namespace, &name, COMPONENT_AGENT, &spec.agent)),
    ];

    let ctx = Arc::new(AgentContext {
	owner: owner.clone(),
	namespace,
	name,
	openshift,
	etcd,
    });

    let zones = spec.zones();
    if zones.is_empty() {
	builders.push(Box::new(DaemonSetBuilder { ctx: ctx.clone(), zone: None }));
    }
    for zone in zones {
	builders.push(Box::new(DaemonSetBuilder { ctx: ctx.clone(), zone: Some(zone) }));
    }

    builders.push(Box::new(ServiceBuilder { ctx: ctx.clone(), headless: true }));
    builders.push(Box::new(ServiceBuilder { ctx: ctx.clone(), headless: false }));
    builders.push(Box::new(ClusterRoleBuilder { ctx: ctx.clone() }));
    builders.push(Box::new(ClusterRoleBindingBuilder { ctx: ctx.clone() }));
    builders.push(Box::new(K8sSensorConfigMapBuilder { ctx: ctx.clone() }));
    builders.push(Box::new(K8sSensorDeploymentBuilder { ctx }));

    Ok(builders)
}

struct DaemonSetBuilder {
    ctx: Arc<AgentContext>,
    zone: Option<api::ZoneSpec>,
}

impl DaemonSetBuilder {

    fn name(&self) -> String {
	match &self.zone {
	    Some(zone) => format!("{}-{}", self.ctx.name, zone.name),
	    None => self.ctx.name.clone(),
	}
    }
}

impl ObjectBuilder for DaemonSetBuilder {

    fn component_name(&self) -> &str {
	COMPONENT_AGENT
    }

    fn is_namespaced(&self) -> bool {
	true
    }

    fn build(&self) -> Result<Option<DynamicObject>, Error> {
	let ctx = &self.ctx;
	let backend = &ctx.owner.spec.agent;
	let image = backend.image();

	let mut labels = ctx.labels(COMPONENT_AGENT);
	let zone_name = self.zone.as_ref().map(|zone| zone.name.as_str()).or(ctx.owner.spec.zone_name.as_deref());
	if let Some(zone) = &self.zone {
	    labels.insert(ZONE_LABEL.to_string(), zone.name.clone());
	}

	let container = Container {
	    name: COMPONENT_AGENT.to_string(),
	    image: Some(image.reference(api::agent::DEFAULT_AGENT_IMAGE)),
	    image_pull_policy: Some(image.pull_policy()),
	    env: Some(agent_env(&ctx.name, backend, zone_name)),
	    ports: Some(vec![ContainerPort {
		name: Some(String::from("agent-apis")),
		container_port: AGENT_PORT,
		..ContainerPort::default()
	    }]),
	    volume_mounts: Some(vec![VolumeMount {
		name: CONFIG_VOLUME.to_string(),
		mount_path: CONFIG_PATH.to_string(),
		..VolumeMount::default()
	    }]),
	    ..Container::default()
	};

	let daemonset = DaemonSet {
	    metadata: meta(&ctx.namespace, &self.name()),
	    spec: Some(DaemonSetSpec {
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
			service_account_name: Some(ctx.name.clone()),
			host_network: Some(true),
			host_pid: Some(true),
			node_selector: self.zone.as_ref().and_then(|zone| zone.node_selector.clone()),
			containers: vec![container],
			volumes: Some(vec![Volume {
			    name: CONFIG_VOLUME.to_string(),
			    config_map: Some(ConfigMapVolumeSource {
				name: ctx.name.clone(),
				..ConfigMapVolumeSource::default()
			    }),
			    ..Volume::default()
			}]),
			..PodSpec::default()
		    }),
		},
		..DaemonSetSpec::default()
	    }),
	    ..DaemonSet::default()
	};
	Ok(Some(to_dynamic(&daemonset)?))
    }
}

/*
 * The headless Service always exists so agents can find each other; the
 * regular one only when asked for.
 */
struct ServiceBuilder {
    ctx: Arc<AgentContext>,
    headless: bool,
}

impl ObjectBuilder for ServiceBuilder {

    fn component_name(&self) -> &str {
	COMPONENT_AGENT
    }

    fn is_namespaced(&self) -> bool {
	true
    }

    fn build(&self) -> Result<Option<DynamicObject>, Error> {
	let ctx = &self.ctx;
	if !self.headless && !ctx.owner.spec.service_enabled() {
	    return Ok(None);
	}

	let name = match self.headless {
	    true => format!("{}-headless", ctx.name),
	    false => ctx.name.clone(),
	};

	let service = Service {
	    metadata: meta(&ctx.namespace, &name),
	    spec: Some(KubeServiceSpec {
		selector: Some(ctx.labels(COMPONENT_AGENT)),
		cluster_ip: self.headless.then(|| String::from("None")),
		ports: Some(vec![ServicePort {
		    name: Some(String::from("agent-apis")),
		    port: AGENT_PORT,
		    protocol: Some(String::from("TCP")),
		    ..ServicePort::default()
		}]),
		..KubeServiceSpec::default()
	    }),
	    ..Service::default()
	};
	Ok(Some(to_dynamic(&service)?))
    }
}

struct ClusterRoleBuilder {
    ctx: Arc<AgentContext>,
}

fn rule(groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
	api_groups: Some(groups.iter().map(|g| g.to_string()).collect()),
	resources: Some(resources.iter().map(|r| r.to_string()).collect()),
	verbs: verbs.iter().map(|v| v.to_string()).collect(),
	..PolicyRule::default()
    }
}

const READER_VERBS: &[&str] = &["get", "list", "watch"];

impl ObjectBuilder for ClusterRoleBuilder {

    fn component_name(&self) -> &str {
	COMPONENT_AGENT
    }

    fn is_namespaced(&self) -> bool {
	false
    }

    fn build(&self) -> Result<Option<DynamicObject>, Error> {
	let mut rules = vec![
	    PolicyRule {
		non_resource_urls: Some(
		    ["/version", "/healthz", "/metrics", "/stats/summary", "/metrics/cadvisor"]
			.iter()
			.map(|url| url.to_string())
			.collect(),
		),
		verbs: vec![String::from("get")],
		..PolicyRule::default()
	    },
	    rule(&[""], &["nodes", "nodes/stats", "nodes/metrics", "pods"], READER_VERBS),
	    rule(&["apps"], &["daemonsets", "deployments", "replicasets", "statefulsets"], READER_VERBS),
	];
	if self.ctx.openshift {
	    let mut scc = rule(&["security.openshift.io"], &["securitycontextconstraints"], &["use"]);
	    scc.resource_names = Some(vec![String::from("privileged")]);
	    rules.push(scc);
	}

	let role = ClusterRole {
	    metadata: ObjectMeta {
		name: Some(self.ctx.cluster_wide_name()),
		..ObjectMeta::default()
	    },
	    rules: Some(rules),
	    ..ClusterRole::default()
	};
	Ok(Some(to_dynamic(&role)?))
    }
}

struct ClusterRoleBindingBuilder {
    ctx: Arc<AgentContext>,
}

impl ObjectBuilder for ClusterRoleBindingBuilder {

    fn component_name(&self) -> &str {
	COMPONENT_AGENT
    }

    fn is_namespaced(&self) -> bool {
	false
    }

    fn build(&self) -> Result<Option<DynamicObject>, Error> {
	let binding = ClusterRoleBinding {
	    metadata: ObjectMeta {
		name: Some(self.ctx.cluster_wide_name()),
		..ObjectMeta::default()
	    },
	    role_ref: RoleRef {
		api_group: String::from("rbac.authorization.k8s.io"),
		kind: String::from("ClusterRole"),
		name: self.ctx.cluster_wide_name(),
	    },
	    subjects: Some(vec![Subject {
		kind: String::from("ServiceAccount"),
		name: self.ctx.name.clone(),
		namespace: Some(self.ctx.namespace.clone()),
		..Subject::default()
	    }]),
	};
	Ok(Some(to_dynamic(&binding)?))
    }
}

/*
 * Configuration of the k8s sensor. ETCD settings are only rendered when
 * discovery produced targets.
 */
struct K8sSensorConfigMapBuilder {
    ctx: Arc<AgentContext>,
}

impl ObjectBuilder for K8sSensorConfigMapBuilder {

    fn component_name(&self) -> &str {
	COMPONENT_K8SENSOR
    }

    fn is_namespaced(&self) -> bool {
	true
    }

    fn build(&self) -> Result<Option<DynamicObject>, Error> {
	let ctx = &self.ctx;
	if !ctx.owner.spec.k8s_sensor_enabled() {
	    return Ok(None);
	}

	let mut data = BTreeMap::new();
	if let Some(cluster) = &ctx.owner.spec.cluster_name {
	    data.insert(String::from("cluster_name"), cluster.clone());
	}
	if let Some(etcd) = &ctx.etcd {
	    data.insert(String::from("etcd_targets"), etcd.targets.join(","));
	    if etcd.ca_found {
		data.insert(String::from("etcd_ca_file"), String::from("/var/run/secrets/etcd/ca.crt"));
	    }
	}

	let config_map = ConfigMap {
	    metadata: meta(&ctx.namespace, &ctx.k8sensor_name()),
	    data: Some(data),
	    ..ConfigMap::default()
	};
	Ok(Some(to_dynamic(&config_map)?))
    }
}

struct K8sSensorDeploymentBuilder {
    ctx: Arc<AgentContext>,
}

impl ObjectBuilder for K8sSensorDeploymentBuilder {

    fn component_name(&self) -> &str {
	COMPONENT_K8SENSOR
    }

    fn is_namespaced(&self) -> bool {
	true
    }

    fn build(&self) -> Result<Option<DynamicObject>, Error> {
	let ctx = &self.ctx;
	if !ctx.owner.spec.k8s_sensor_enabled() {
	    return Ok(None);
	}

	let sensor = ctx.owner.spec.k8s_sensor();
	let image = sensor.image.clone().unwrap_or_default();
	let labels = ctx.labels(COMPONENT_K8SENSOR);

	let mut env = agent_env(&ctx.name, &ctx.owner.spec.agent, ctx.owner.spec.zone_name.as_deref());
	env.push(EnvVar {
	    name: String::from("AGENT_CONFIG"),
	    value: Some(ctx.k8sensor_name()),
	    ..EnvVar::default()
	});

	let deployment = Deployment {
	    metadata: meta(&ctx.namespace, &ctx.k8sensor_name()),
	    spec: Some(DeploymentSpec {
		replicas: Some(sensor.replicas.unwrap_or(1)),
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
			service_account_name: Some(ctx.name.clone()),
			containers: vec![Container {
			    name: COMPONENT_K8SENSOR.to_string(),
			    image: Some(image.reference(api::agent::DEFAULT_K8SENSOR_IMAGE)),
			    image_pull_policy: Some(image.pull_policy()),
			    env: Some(env),
			    ..Container::default()
			}],
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
