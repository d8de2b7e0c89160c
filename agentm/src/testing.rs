/*
 * In-memory ApplyClient used by the unit tests. It keeps a tiny object store,
 * records every call in order and fails the calls it is told to.
 */

use crate::client::{ApplyClient, ApplyMode};
use crate::dependent::DependentRef;
use crate::errors::{api_error, Error};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::DynamicObject;
use kube::runtime::events::Event as KubeEvent;
use kube::runtime::events::EventType as KubeEventType;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CallKind {
    DryRun,
    Apply,
    Get,
    Delete,
    Patch,
    PatchStatus,
    List,
    Event,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    DryRun(DependentRef),
    Apply(DependentRef),
    Get(DependentRef),
    Delete(DependentRef),
    Patch(DependentRef),
    PatchStatus(DependentRef),
    List(DependentRef),
    Event(DependentRef),
}

/* an event as the fake received it */
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    pub target: DependentRef,
    pub warning: bool,
    pub reason: String,
    pub note: Option<String>,
}

impl Call {
    pub fn kind(&self) -> CallKind {
	match self {
	    Call::DryRun(_) => CallKind::DryRun,
	    Call::Apply(_) => CallKind::Apply,
	    Call::Get(_) => CallKind::Get,
	    Call::Delete(_) => CallKind::Delete,
	    Call::Patch(_) => CallKind::Patch,
	    Call::PatchStatus(_) => CallKind::PatchStatus,
	    Call::List(_) => CallKind::List,
	    Call::Event(_) => CallKind::Event,
	}
    }

    pub fn target(&self) -> &DependentRef {
	match self {
	    Call::DryRun(t)
	    | Call::Apply(t)
	    | Call::Get(t)
	    | Call::Delete(t)
	    | Call::Patch(t)
	    | Call::PatchStatus(t)
	    | Call::List(t)
	    | Call::Event(t) => t,
	}
    }
}

#[derive(Default)]
struct FakeState {
    objects: BTreeMap<DependentRef, DynamicObject>,
    calls: Vec<Call>,
    events: Vec<RecordedEvent>,
    failures: BTreeMap<(CallKind, DependentRef), u16>,
    lingering: BTreeSet<DependentRef>,
    resource_version: u64,
}

impl FakeState {
    fn next_version(&mut self) -> String {
	self.resource_version += 1;
	self.resource_version.to_string()
    }

    fn record(&mut self, call: Call) -> Result<(), Error> {
	let key = (call.kind(), call.target().clone());
	self.calls.push(call);

	match self.failures.get(&key) {
	    Some(code) => Err(api_error(*code, reason(*code))),
	    None => Ok(()),
	}
    }
}

fn reason(code: u16) -> &'static str {
    match code {
	403 => "Forbidden",
	404 => "NotFound",
	409 => "Conflict",
	422 => "Invalid",
	_ => "InternalError",
    }
}

#[derive(Default)]
pub struct FakeClient {
    state: Mutex<FakeState>,
}

pub fn config_map(namespace: &str, name: &str) -> DynamicObject {
    dynamic(json!({
	"apiVersion": "v1",
	"kind": "ConfigMap",
	"metadata": { "name": name, "namespace": namespace },
	"data": { "name": name }
    }))
}

pub fn dynamic(value: Value) -> DynamicObject {
    serde_json::from_value(value).unwrap()
}

/*
 * RFC 7386 JSON merge patch.
 */
pub fn merge_patch(target: &mut Value, patch: &Value) {
    match patch {
	Value::Object(patch) => {
	    if !target.is_object() {
		*target = Value::Object(Map::new());
	    }
	    let map = target.as_object_mut().unwrap();
	    for (key, value) in patch {
		if value.is_null() {
		    map.remove(key);
		} else {
		    merge_patch(map.entry(key.clone()).or_insert(Value::Null), value);
		}
	    }
	}
	_ => *target = patch.clone(),
    }
}

impl FakeClient {
    pub fn new() -> Self {
	Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
	self.state.lock().unwrap()
    }

    /* stores `obj` as if it had been created by someone else */
    pub fn insert(&self, mut obj: DynamicObject) -> DependentRef {
	let target = DependentRef::from_object(&obj).unwrap();
	let mut state = self.lock();

	if obj.metadata.uid.is_none() {
	    obj.metadata.uid = Some(format!("uid-{}", target.name));
	}
	obj.metadata.resource_version = Some(state.next_version());
	state.objects.insert(target.clone(), obj);
	target
    }

    pub fn object(&self, target: &DependentRef) -> Option<DynamicObject> {
	self.lock().objects.get(target).cloned()
    }

    pub fn contains(&self, target: &DependentRef) -> bool {
	self.lock().objects.contains_key(target)
    }

    pub fn refs(&self) -> BTreeSet<DependentRef> {
	self.lock().objects.keys().cloned().collect()
    }

    pub fn resource_version(&self, target: &DependentRef) -> Option<String> {
	self.object(target).and_then(|obj| obj.metadata.resource_version)
    }

    pub fn fail(&self, kind: CallKind, target: &DependentRef, code: u16) {
	self.lock().failures.insert((kind, target.clone()), code);
    }

    pub fn clear_failures(&self) {
	self.lock().failures.clear();
    }

    /* deletes of `target` are accepted but the object stays around */
    pub fn linger_on_delete(&self, target: &DependentRef) {
	self.lock().lingering.insert(target.clone());
    }

    pub fn calls(&self) -> Vec<Call> {
	self.lock().calls.clone()
    }

    pub fn calls_of(&self, kind: CallKind) -> Vec<Call> {
	self.calls().into_iter().filter(|call| call.kind() == kind).collect()
    }

    pub fn targets_of(&self, kind: CallKind) -> Vec<DependentRef> {
	self.calls_of(kind).iter().map(|call| call.target().clone()).collect()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
	self.lock().events.clone()
    }

    pub fn reset_calls(&self) {
	let mut state = self.lock();
	state.calls.clear();
	state.events.clear();
    }

    fn patch_object(&self, call: Call, patch: &Value, status_only: bool) -> Result<(), Error> {
	let target = call.target().clone();
	let mut state = self.lock();
	state.record(call)?;

	let current = match state.objects.get(&target) {
	    Some(obj) => obj.clone(),
	    None => return Err(api_error(404, "NotFound")),
	};

	let mut patch = patch.clone();
	if !status_only {
	    let expected = patch
		.pointer("/metadata/resourceVersion")
		.and_then(Value::as_str)
		.map(str::to_string);
	    if let Some(expected) = expected {
		if Some(expected) != current.metadata.resource_version {
		    return Err(api_error(409, "Conflict"));
		}
		patch["metadata"].as_object_mut().unwrap().remove("resourceVersion");
	    }
	} else {
	    patch = json!({ "status": patch.get("status").cloned().unwrap_or(Value::Null) });
	}

	let mut value = serde_json::to_value(&current).unwrap();
	let before = value.clone();
	merge_patch(&mut value, &patch);
	if value == before {
	    return Ok(());
	}

	let mut updated: DynamicObject = serde_json::from_value(value).unwrap();
	updated.metadata.resource_version = Some(state.next_version());

	let finalizers_left = updated.metadata.finalizers.as_ref().is_some_and(|f| !f.is_empty());
	if updated.metadata.deletion_timestamp.is_some() && !finalizers_left {
	    state.objects.remove(&target);
	} else {
	    state.objects.insert(target, updated);
	}
	Ok(())
    }
}

fn content(obj: &DynamicObject) -> Value {
    let mut value = serde_json::to_value(obj).unwrap();
    if let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) {
	metadata.remove("resourceVersion");
	metadata.remove("uid");
    }
    value
}

#[async_trait]
impl ApplyClient for FakeClient {
    async fn apply(&self, obj: &DynamicObject, mode: ApplyMode) -> Result<DynamicObject, Error> {
	let target = DependentRef::from_object(obj)?;
	let mut state = self.lock();

	match mode {
	    ApplyMode::DryRun => {
		state.record(Call::DryRun(target))?;
		Ok(obj.clone())
	    }
	    ApplyMode::Commit => {
		state.record(Call::Apply(target.clone()))?;

		let mut applied = obj.clone();
		match state.objects.get(&target) {
		    Some(existing) => {
			applied.metadata.uid = existing.metadata.uid.clone();
			applied.metadata.finalizers = existing.metadata.finalizers.clone();
			applied.metadata.deletion_timestamp = existing.metadata.deletion_timestamp.clone();
			if content(existing) == content(&applied) {
			    return Ok(existing.clone());
			}
		    }
		    None => applied.metadata.uid = Some(format!("uid-{}", target.name)),
		}
		applied.metadata.resource_version = Some(state.next_version());
		state.objects.insert(target, applied.clone());
		Ok(applied)
	    }
	}
    }

    async fn get(&self, target: &DependentRef) -> Result<Option<DynamicObject>, Error> {
	let mut state = self.lock();
	state.record(Call::Get(target.clone()))?;
	Ok(state.objects.get(target).cloned())
    }

    async fn delete(&self, target: &DependentRef) -> Result<(), Error> {
	let mut state = self.lock();
	state.record(Call::Delete(target.clone()))?;

	if !state.lingering.contains(target) {
	    state.objects.remove(target);
	}
	Ok(())
    }

    async fn patch(&self, target: &DependentRef, patch: &Value) -> Result<(), Error> {
	self.patch_object(Call::Patch(target.clone()), patch, false)
    }

    async fn patch_status(&self, target: &DependentRef, patch: &Value) -> Result<(), Error> {
	self.patch_object(Call::PatchStatus(target.clone()), patch, true)
    }

    async fn list(&self, template: &DependentRef, labels: &str) -> Result<Vec<DependentRef>, Error> {
	let mut state = self.lock();
	state.record(Call::List(template.clone()))?;

	let wanted: Vec<(&str, &str)> = labels
	    .split(',')
	    .filter_map(|pair| pair.split_once('='))
	    .collect();

	let refs = state
	    .objects
	    .iter()
	    .filter(|(target, _)| {
		target.group == template.group
		    && target.version == template.version
		    && target.kind == template.kind
		    && target.namespace == template.namespace
	    })
	    .filter(|(_, obj)| {
		let labels = obj.metadata.labels.clone().unwrap_or_default();
		wanted.iter().all(|(k, v)| labels.get(*k).map(String::as_str) == Some(*v))
	    })
	    .map(|(target, _)| target.clone())
	    .collect();
	Ok(refs)
    }

    async fn publish_event(&self, reference: &ObjectReference, event: &KubeEvent) -> Result<(), Error> {
	let target = DependentRef::new(
	    reference.api_version.as_deref().unwrap_or_default(),
	    reference.kind.as_deref().unwrap_or_default(),
	    reference.namespace.as_deref(),
	    reference.name.as_deref().unwrap_or_default(),
	);
	let mut state = self.lock();
	state.record(Call::Event(target.clone()))?;

	state.events.push(RecordedEvent {
	    target,
	    warning: matches!(event.type_, KubeEventType::Warning),
	    reason: event.reason.clone(),
	    note: event.note.clone(),
	});
	Ok(())
    }
}
