use crate::client::ApplyClient;
use crate::dependent::DependentRef;
use crate::errors::Error;

use k8s_openapi::api::core::v1::Endpoints;
use k8s_openapi::api::core::v1::Service;
use kube::api::DynamicObject;
use log;
use serde::de::DeserializeOwned;

const OPENSHIFT_CRD: &str = "clusteroperators.config.openshift.io";

const ETCD_NAMESPACE: &str = "kube-system";
const ETCD_SERVICES: &[&str] = &["etcd", "etcd-metrics", "etcd-k8s"];
const ETCD_PORT_NAME: &str = "metrics";
const ETCD_CA_SECRET: &str = "etcd-ca";
pub const ETCD_SCHEME_ANNOTATION: &str = "agent.runfc.br/etcd-scheme";

/*
 * Result of ETCD discovery: the metrics URLs to scrape and whether the CA
 * secret to verify them was found next to the owner.
 */
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EtcdDiscovery {
    pub targets: Vec<String>,
    pub ca_found: bool,
}

/*
 * `explicit` is the owner's own answer; otherwise look for a CRD only
 * OpenShift clusters serve. Failing to ask means "no".
 */
pub async fn is_openshift(client: &dyn ApplyClient, explicit: Option<bool>) -> bool {
    if let Some(explicit) = explicit {
	return explicit;
    }

    let crd = DependentRef::new("apiextensions.k8s.io/v1", "CustomResourceDefinition", None, OPENSHIFT_CRD);
    match client.exists(&crd).await {
	Ok(found) => found,
	Err(err) => {
	    log::warn!("Unable to detect OpenShift, assuming plain Kubernetes: {}", err);
	    false
	}
    }
}

/*
 * Explicit targets win over discovery. `None` means nothing usable was found.
 */
pub async fn discover_etcd(client: &dyn ApplyClient, owner_namespace: &str, explicit: &[String]) -> Option<EtcdDiscovery> {
    match lookup_etcd(client, owner_namespace, explicit).await {
	Ok(found) => found,
	Err(err) => {
	    log::warn!("ETCD discovery failed: {}", err);
	    None
	}
    }
}

async fn lookup_etcd(client: &dyn ApplyClient, owner_namespace: &str, explicit: &[String]) -> Result<Option<EtcdDiscovery>, Error> {
    let ca_secret = DependentRef::new("v1", "Secret", Some(owner_namespace), ETCD_CA_SECRET);

    if !explicit.is_empty() {
	return Ok(Some(EtcdDiscovery {
	    targets: explicit.to_vec(),
	    ca_found: client.exists(&ca_secret).await?,
	}));
    }

    for name in ETCD_SERVICES {
	let service: Service = match get_typed(client, &DependentRef::new("v1", "Service", Some(ETCD_NAMESPACE), name)).await? {
	    Some(service) => service,
	    None => continue,
	};

	let (port, scheme) = match metrics_port(&service) {
	    Some(found) => found,
	    None => {
		log::debug!("Service {}/{} has no {} port", ETCD_NAMESPACE, name, ETCD_PORT_NAME);
		continue;
	    }
	};

	let endpoints: Endpoints = match get_typed(client, &DependentRef::new("v1", "Endpoints", Some(ETCD_NAMESPACE), name)).await? {
	    Some(endpoints) => endpoints,
	    None => continue,
	};

	let targets = targets_from_endpoints(&endpoints, &scheme, port);
	if targets.is_empty() {
	    continue;
	}

	log::info!("Discovered {} ETCD target(s) behind {}/{}", targets.len(), ETCD_NAMESPACE, name);
	return Ok(Some(EtcdDiscovery {
	    targets,
	    ca_found: client.exists(&ca_secret).await?,
	}));
    }

    Ok(None)
}

async fn get_typed<T: DeserializeOwned>(client: &dyn ApplyClient, target: &DependentRef) -> Result<Option<T>, Error> {
    match client.get(target).await? {
	Some(obj) => Ok(Some(from_object(obj)?)),
	None => Ok(None),
    }
}

fn from_object<T: DeserializeOwned>(obj: DynamicObject) -> Result<T, Error> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

pub fn scheme_for_port(port: i32) -> &'static str {
    match port {
	2381 => "http",
	_ => "https",
    }
}

/*
 * Port and scheme of the service's `metrics` port. The scheme annotation on
 * the service overrides the one guessed from the port number.
 */
pub fn metrics_port(service: &Service) -> Option<(i32, String)> {
    let port = service
	.spec
	.as_ref()?
	.ports
	.as_ref()?
	.iter()
	.find(|port| port.name.as_deref() == Some(ETCD_PORT_NAME))?
	.port;

    let scheme = service
	.metadata
	.annotations
	.as_ref()
	.and_then(|annotations| annotations.get(ETCD_SCHEME_ANNOTATION))
	.cloned()
	.unwrap_or_else(|| scheme_for_port(port).to_string());

    Some((port, scheme))
}

pub fn targets_from_endpoints(endpoints: &Endpoints, scheme: &str, service_port: i32) -> Vec<String> {
    let mut targets = Vec::new();

    for subset in endpoints.subsets.iter().flatten() {
	let port = subset
	    .ports
	    .iter()
	    .flatten()
	    .find(|port| port.name.as_deref() == Some(ETCD_PORT_NAME))
	    .map(|port| port.port)
	    .unwrap_or(service_port);

	for address in subset.addresses.iter().flatten() {
	    targets.push(format!("{}://{}:{}/metrics", scheme, address.ip, port));
	}
    }

    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{dynamic, FakeClient};

    fn service(name: &str, port: i32, scheme: Option<&str>) -> Service {
	let mut value = serde_json::json!({
	    "apiVersion": "v1",
	    "kind": "Service",
	    "metadata": { "name": name, "namespace": ETCD_NAMESPACE },
	    "spec": { "ports": [{ "name": "metrics", "port": port }] }
	});
	if let Some(scheme) = scheme {
	    value["metadata"]["annotations"] = serde_json::json!({ ETCD_SCHEME_ANNOTATION: scheme });
	}
	serde_json::from_value(value).unwrap()
    }

    fn endpoints(name: &str, ips: &[&str], port: i32) -> serde_json::Value {
	let addresses: Vec<serde_json::Value> = ips.iter().map(|ip| serde_json::json!({ "ip": ip })).collect();
	serde_json::json!({
	    "apiVersion": "v1",
	    "kind": "Endpoints",
	    "metadata": { "name": name, "namespace": ETCD_NAMESPACE },
	    "subsets": [{ "addresses": addresses, "ports": [{ "name": "metrics", "port": port }] }]
	})
    }

    #[test]
    fn scheme_follows_the_port() {
	assert_eq!(metrics_port(&service("etcd", 2379, None)), Some((2379, String::from("https"))));
	assert_eq!(metrics_port(&service("etcd", 2381, None)), Some((2381, String::from("http"))));
	assert_eq!(metrics_port(&service("etcd", 9979, None)), Some((9979, String::from("https"))));
	assert_eq!(metrics_port(&service("etcd", 2379, Some("http"))), Some((2379, String::from("http"))));
    }

    #[test]
    fn service_without_metrics_port_is_skipped() {
	let service: Service = serde_json::from_value(serde_json::json!({
	    "apiVersion": "v1",
	    "kind": "Service",
	    "metadata": { "name": "etcd" },
	    "spec": { "ports": [{ "name": "client", "port": 2379 }] }
	}))
	.unwrap();

	assert_eq!(metrics_port(&service), None);
    }

    #[test]
    fn builds_one_target_per_address() {
	let endpoints: Endpoints = serde_json::from_value(endpoints("etcd", &["10.0.0.1", "10.0.0.2"], 2381)).unwrap();

	assert_eq!(
	    targets_from_endpoints(&endpoints, "http", 2379),
	    vec![
		String::from("http://10.0.0.1:2381/metrics"),
		String::from("http://10.0.0.2:2381/metrics"),
	    ]
	);
    }

    #[tokio::test]
    async fn explicit_openshift_setting_wins() {
	let client = FakeClient::new();
	assert!(is_openshift(&client, Some(true)).await);
	assert!(!is_openshift(&client, None).await);

	client.insert(dynamic(serde_json::json!({
	    "apiVersion": "apiextensions.k8s.io/v1",
	    "kind": "CustomResourceDefinition",
	    "metadata": { "name": OPENSHIFT_CRD }
	})));
	assert!(is_openshift(&client, None).await);
	assert!(!is_openshift(&client, Some(false)).await);
    }

    #[tokio::test]
    async fn discovers_the_first_usable_service() {
	let client = FakeClient::new();
	client.insert(dynamic(serde_json::to_value(service("etcd-metrics", 2381, None)).unwrap()));
	client.insert(dynamic(endpoints("etcd-metrics", &["10.0.0.5"], 2381)));

	let found = discover_etcd(&client, "agents", &[]).await.unwrap();

	assert_eq!(found.targets, vec![String::from("http://10.0.0.5:2381/metrics")]);
	assert!(!found.ca_found);
    }

    #[tokio::test]
    async fn explicit_targets_skip_discovery() {
	let client = FakeClient::new();
	client.insert(dynamic(serde_json::json!({
	    "apiVersion": "v1",
	    "kind": "Secret",
	    "metadata": { "name": ETCD_CA_SECRET, "namespace": "agents" }
	})));

	let explicit = vec![String::from("https://etcd.local:2379/metrics")];
	let found = discover_etcd(&client, "agents", &explicit).await.unwrap();

	assert_eq!(found.targets, explicit);
	assert!(found.ca_found);
    }

    #[tokio::test]
    async fn nothing_found_is_none() {
	let client = FakeClient::new();
	assert_eq!(discover_etcd(&client, "agents", &[]).await, None);
    }
}
