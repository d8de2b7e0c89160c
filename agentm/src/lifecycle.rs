use crate::client::{delete_all_in_time_limit, ApplyClient, ApplyMode};
use crate::config::DeleteLimits;
use crate::dependent::DependentRef;
use crate::errors::Error;
use crate::transform::Transformer;

use kube::api::DynamicObject;
use kube::api::ObjectMeta;
use kube::api::TypeMeta;
use log;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

const RECORD_SUFFIX: &str = "-dependents";
const RECORD_COMPONENT: &str = "dependents";
const ORPHANS_SUFFIX: &str = ".orphans";

pub type DependentSet = BTreeSet<DependentRef>;

/*
 * LifecycleRecord persists the set of dependents an owner intends to own in
 * the ConfigMap `<owner>-<kind>-dependents`, next to the owner. Only the
 * entries of the owner's own uid are ever read back.
 *
 *   data:
 *     <owner uid>: '[{"group":"apps","version":"v1","kind":"DaemonSet",...}]'
 *     <owner uid>.orphans: '[...]'
 *
 * The `.orphans` entry only exists between a record write that shrank the set
 * and the garbage collection that removed the difference.
 */
pub struct LifecycleRecord<'a> {
    client: &'a dyn ApplyClient,
    transformer: &'a Transformer,
    target: DependentRef,
    limits: DeleteLimits,
}

impl<'a> LifecycleRecord<'a> {

    pub fn new(client: &'a dyn ApplyClient, transformer: &'a Transformer, limits: DeleteLimits) -> Self {
	let name = format!(
	    "{}-{}{}",
	    transformer.owner_name(),
	    transformer.owner_kind().to_lowercase(),
	    RECORD_SUFFIX
	);
	let target = DependentRef::new("v1", "ConfigMap", transformer.owner_namespace(), &name);

	Self {
	    client,
	    transformer,
	    target,
	    limits,
	}
    }

    pub fn target(&self) -> &DependentRef {
	&self.target
    }

    /*
     * The owner's entry plus its pending orphans. Entries that can't be
     * decoded are skipped so a single corrupt value does not wedge the owner.
     */
    pub async fn read(&self) -> Result<DependentSet, Error> {
	let mut dependents = DependentSet::new();

	let record = match self.client.get(&self.target).await? {
	    Some(record) => record,
	    None => return Ok(dependents),
	};
	let data = match record.data.get("data").and_then(Value::as_object) {
	    Some(data) => data,
	    None => return Ok(dependents),
	};

	let uid = self.transformer.owner_uid();
	for key in [uid.to_string(), format!("{}{}", uid, ORPHANS_SUFFIX)] {
	    let decoded = match data.get(&key) {
		Some(value) => value.as_str().map(serde_json::from_str::<Vec<DependentRef>>),
		None => continue,
	    };

	    match decoded {
		Some(Ok(refs)) => dependents.extend(refs),
		Some(Err(err)) => log::warn!("Skipping corrupt entry {} of {}: {}", key, self.target, err),
		None => log::warn!("Skipping non-string entry {} of {}", key, self.target),
	    }
	}

	Ok(dependents)
    }

    /*
     * Replaces the record content with `current`, plus the pending `orphans`
     * when there are any.
     */
    pub async fn write(&self, current: &DependentSet, orphans: &DependentSet) -> Result<(), Error> {
	let uid = self.transformer.owner_uid();

	let mut data = Map::new();
	data.insert(uid.to_string(), Value::String(encode(current)?));
	if !orphans.is_empty() {
	    data.insert(format!("{}{}", uid, ORPHANS_SUFFIX), Value::String(encode(orphans)?));
	}

	let record = DynamicObject {
	    types: Some(TypeMeta {
		api_version: String::from("v1"),
		kind: String::from("ConfigMap"),
	    }),
	    metadata: ObjectMeta {
		name: Some(self.target.name.clone()),
		namespace: self.target.namespace.clone(),
		..ObjectMeta::default()
	    },
	    data: serde_json::json!({ "data": data }),
	};
	let record = self.transformer.transform(record, RECORD_COMPONENT, true);

	log::debug!("Recording {} dependent(s) and {} orphan(s) in {}", current.len(), orphans.len(), self.target);
	self.client.apply(&record, ApplyMode::Commit).await?;
	Ok(())
    }

    /*
     * Deletes every recorded dependent, waits for them to be gone and then
     * drops the record itself.
     */
    pub async fn delete_all(&self) -> Result<(), Error> {
	let dependents: Vec<DependentRef> = self.read().await?.into_iter().collect();

	log::info!("Deleting {} dependent(s) recorded in {}", dependents.len(), self.target);
	delete_all_in_time_limit(self.client, &dependents, self.limits).await?;

	self.client.delete(&self.target).await
    }
}

fn encode(refs: &DependentSet) -> Result<String, Error> {
    let refs: Vec<&DependentRef> = refs.iter().collect();
    Ok(serde_json::to_string(&refs)?)
}
