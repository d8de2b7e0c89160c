use crate::errors::Error;
use crate::owner::Owner;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use std::collections::BTreeMap;

pub const LABEL_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";
pub const LABEL_VERSION: &str = "app.kubernetes.io/version";
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";
pub const LABEL_PART_OF: &str = "app.kubernetes.io/part-of";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_GENERATION: &str = "agent.runfc.br/generation";

const PART_OF: &str = "runfc";
const MANAGED_BY: &str = "agentm";

/*
 * Transformer stamps builder output with the common labels and, for
 * namespaced objects, a controller owner reference back to the owner.
 */
#[derive(Clone, Debug)]
pub struct Transformer {
    app_name: String,
    instance: String,
    namespace: Option<String>,
    version: String,
    generation: i64,
    owner_ref: OwnerReference,
}

impl Transformer {

    pub fn new<K: Owner>(owner: &K, operator_version: &str) -> Result<Self, Error> {
	let meta = owner.meta();
	let instance = meta.name.clone().ok_or(Error::MissingField("metadata.name"))?;
	let owner_ref = owner.controller_owner_ref(&()).ok_or(Error::MissingField("metadata.uid"))?;

	Ok(Self {
	    app_name: K::APP_NAME.to_string(),
	    instance,
	    namespace: meta.namespace.clone(),
	    version: operator_version.to_string(),
	    generation: meta.generation.unwrap_or_default(),
	    owner_ref,
	})
    }

    pub fn owner_uid(&self) -> &str {
	&self.owner_ref.uid
    }

    pub fn owner_namespace(&self) -> Option<&str> {
	self.namespace.as_deref()
    }

    pub fn owner_name(&self) -> &str {
	&self.instance
    }

    pub fn owner_kind(&self) -> &str {
	&self.owner_ref.kind
    }

    /*
     * Labels shared by every object of the given component. Builders use the
     * non-volatile subset of them as pod selectors.
     */
    pub fn common_labels(&self, component: &str) -> BTreeMap<String, String> {
	let mut labels = self.selector_labels();
	labels.insert(LABEL_VERSION.to_string(), self.version.clone());
	labels.insert(LABEL_COMPONENT.to_string(), component.to_string());
	labels.insert(LABEL_PART_OF.to_string(), PART_OF.to_string());
	labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string());
	labels.insert(LABEL_GENERATION.to_string(), self.generation.to_string());
	labels
    }

    pub fn selector_labels(&self) -> BTreeMap<String, String> {
	BTreeMap::from([
	    (LABEL_NAME.to_string(), self.app_name.clone()),
	    (LABEL_INSTANCE.to_string(), self.instance.clone()),
	])
    }

    pub fn transform(&self, mut obj: DynamicObject, component: &str, namespaced: bool) -> DynamicObject {
	let labels = obj.metadata.labels.get_or_insert_with(BTreeMap::new);
	labels.extend(self.common_labels(component));

	if !namespaced {
	    // a cluster scoped object cannot point to a namespaced owner
	    return obj;
	}

	if obj.metadata.namespace.is_none() {
	    obj.metadata.namespace = self.namespace.clone();
	}

	let refs = obj.metadata.owner_references.get_or_insert_with(Vec::new);
	refs.retain(|r| !(r.kind == self.owner_ref.kind && r.name == self.owner_ref.name));
	refs.push(self.owner_ref.clone());

	obj
    }
}
