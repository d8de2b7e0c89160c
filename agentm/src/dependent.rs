use crate::errors::Error;

use kube::api::ApiResource;
use kube::api::DynamicObject;
use kube::api::GroupVersionKind;
use kube::Resource;
use serde::{Deserialize, Serialize};
use std::fmt;

/*
 * DependentRef identifies a cluster object by GroupVersionKind and namespaced
 * name. It is the unit stored in the lifecycle record and the key every
 * ApplyClient call is addressed by.
 */
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DependentRef {
    #[serde(default)]
    pub group: String,

    pub version: String,

    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    pub name: String,
}

/*
 * Splits an apiVersion such as `apps/v1` or `v1` into (group, version).
 */
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
	Some((group, version)) => (group.to_string(), version.to_string()),
	None => (String::new(), api_version.to_string()),
    }
}

impl DependentRef {

    pub fn new(api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> Self {
	let (group, version) = parse_api_version(api_version);

	Self {
	    group,
	    version,
	    kind: kind.to_string(),
	    namespace: namespace.map(str::to_string),
	    name: name.to_string(),
	}
    }

    /*
     * Reference to an object of a statically known kind.
     */
    pub fn of<K: Resource<DynamicType = ()>>(namespace: Option<&str>, name: &str) -> Self {
	Self {
	    group: K::group(&()).to_string(),
	    version: K::version(&()).to_string(),
	    kind: K::kind(&()).to_string(),
	    namespace: namespace.map(str::to_string),
	    name: name.to_string(),
	}
    }

    pub fn from_object(obj: &DynamicObject) -> Result<Self, Error> {
	let types = obj.types.as_ref().ok_or(Error::MissingField("apiVersion"))?;
	let name = obj.metadata.name.as_deref().ok_or(Error::MissingField("metadata.name"))?;

	Ok(Self::new(&types.api_version, &types.kind, obj.metadata.namespace.as_deref(), name))
    }

    pub fn gvk(&self) -> GroupVersionKind {
	GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }

    pub fn api_resource(&self) -> ApiResource {
	ApiResource::from_gvk(&self.gvk())
    }
}

impl fmt::Display for DependentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
	match &self.namespace {
	    Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
	    None => write!(f, "{} {}", self.kind, self.name),
	}
    }
}
