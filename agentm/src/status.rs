use crate::client::ApplyClient;
use crate::dependent::DependentRef;
use crate::errors::{ignore_not_found, Error};
use crate::multierror::MultiErrorBuilder;
use crate::owner::{from_dynamic, owner_ref, Owner};
use crate::transform::{LABEL_COMPONENT, LABEL_INSTANCE, LABEL_NAME};

use agent_api as api;

use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::chrono::Utc;
use kube::api::DynamicObject;
use kube::runtime::controller::Action as KubeAction;
use kube::runtime::events::Event as KubeEvent;
use kube::runtime::events::EventType as KubeEventType;
use log;
use std::sync::Arc;

pub const CONDITION_RECONCILE_SUCCEEDED: &str = "ReconcileSucceeded";
pub const CONDITION_ALL_AGENTS_AVAILABLE: &str = "AllAgentsAvailable";
pub const CONDITION_ALL_K8S_SENSORS_AVAILABLE: &str = "AllK8sSensorsAvailable";

const REASON_SUCCEEDED: &str = "ReconcileSucceeded";
const REASON_FAILED: &str = "ReconcileFailed";
const EVENT_ACTION: &str = "Reconcile";

/* condition messages are capped by the API server at 32 KiB */
const MAX_MESSAGE_LEN: usize = 32768;

/* and event notes at 1 KiB */
const MAX_NOTE_LEN: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkloadKind {
    DaemonSet,
    Deployment,
}

impl WorkloadKind {
    fn as_str(&self) -> &'static str {
	match self {
	    WorkloadKind::DaemonSet => "DaemonSet",
	    WorkloadKind::Deployment => "Deployment",
	}
    }
}

/*
 * Workload names the pods whose availability is published as one condition.
 * Its objects are the ones of `kind` carrying the owner's selector labels
 * and `component`.
 */
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workload {
    pub condition: &'static str,
    /* plural used in reasons, e.g. `Agents` in `AllDesiredAgentsAvailable` */
    pub subject: &'static str,
    pub kind: WorkloadKind,
    pub component: &'static str,
}

/*
 * StatusManager publishes the outcome of a reconcile on the owner's status
 * subresource and fires an event for every condition that changed. The
 * status seen when the reconcile started is kept so that an unchanged
 * outcome costs no write.
 */
pub struct StatusManager {
    client: Arc<dyn ApplyClient>,
    operator_version: String,
    target: Option<DependentRef>,
    reference: Option<ObjectReference>,
    selector: String,
    generation: Option<i64>,
    workloads: Vec<Workload>,
    old: Option<api::AgentStatus>,
}

impl StatusManager {

    pub fn new(client: Arc<dyn ApplyClient>, operator_version: &str) -> Self {
	Self {
	    client,
	    operator_version: operator_version.to_string(),
	    target: None,
	    reference: None,
	    selector: String::new(),
	    generation: None,
	    workloads: Vec::new(),
	    old: None,
	}
    }

    pub fn set_owner_old<K: Owner>(&mut self, owner: &K) {
	self.target = owner_ref(owner).ok();
	self.reference = Some(owner.object_ref(&()));
	self.selector = format!(
	    "{}={},{}={}",
	    LABEL_NAME,
	    K::APP_NAME,
	    LABEL_INSTANCE,
	    owner.meta().name.as_deref().unwrap_or_default()
	);
	self.generation = owner.meta().generation;
	self.workloads = owner.workloads();
	self.old = owner.status().cloned();
    }

    fn condition(&self, type_: &str, status: api::ConditionStatus, reason: &str, message: String) -> api::Condition {
	api::Condition {
	    type_: type_.to_string(),
	    status,
	    reason: reason.to_string(),
	    message: truncate(message, MAX_MESSAGE_LEN),
	    observed_generation: self.generation,
	    last_transition_time: Some(Utc::now().to_rfc3339()),
	}
    }

    fn reconcile_condition(&self, result: &Result<KubeAction, Error>) -> api::Condition {
	match result {
	    Ok(_) => self.condition(
		CONDITION_RECONCILE_SUCCEEDED,
		api::ConditionStatus::True,
		REASON_SUCCEEDED,
		String::from("Most recent reconcile completed without issue"),
	    ),
	    Err(err) => self.condition(
		CONDITION_RECONCILE_SUCCEEDED,
		api::ConditionStatus::False,
		REASON_FAILED,
		err.to_string(),
	    ),
	}
    }

    async fn workload_objects(&self, workload: &Workload) -> Result<Vec<DynamicObject>, Error> {
	let namespace = self.target.as_ref().and_then(|target| target.namespace.as_deref());
	let template = DependentRef::new("apps/v1", workload.kind.as_str(), namespace, "");
	let labels = format!("{},{}={}", self.selector, LABEL_COMPONENT, workload.component);

	let mut objects = Vec::new();
	for target in self.client.list(&template, &labels).await? {
	    // gone since it was listed
	    if let Some(obj) = self.client.get(&target).await? {
		objects.push(obj);
	    }
	}
	Ok(objects)
    }

    async fn is_available(&self, workload: &Workload) -> Result<bool, Error> {
	let objects = self.workload_objects(workload).await?;
	if objects.is_empty() {
	    return Ok(false);
	}

	for obj in objects {
	    let available = match workload.kind {
		WorkloadKind::DaemonSet => daemon_set_is_available(&from_dynamic::<DaemonSet>(obj)?),
		WorkloadKind::Deployment => deployment_is_available(&from_dynamic::<Deployment>(obj)?),
	    };
	    if !available {
		return Ok(false);
	    }
	}
	Ok(true)
    }

    /*
     * Failing to read the workloads yields an `Unknown` condition along with
     * the error.
     */
    async fn availability_condition(&self, workload: &Workload) -> (api::Condition, Option<Error>) {
	match self.is_available(workload).await {
	    Ok(true) => (
		self.condition(
		    workload.condition,
		    api::ConditionStatus::True,
		    &format!("AllDesired{}Available", workload.subject),
		    format!("All desired {} are available and up to date", workload.subject),
		),
		None,
	    ),
	    Ok(false) => (
		self.condition(
		    workload.condition,
		    api::ConditionStatus::False,
		    &format!("NotAllDesired{}Available", workload.subject),
		    format!("Not all desired {} are available or up to date", workload.subject),
		),
		None,
	    ),
	    Err(err) => (
		self.condition(
		    workload.condition,
		    api::ConditionStatus::Unknown,
		    &format!("{}InfoUnavailable", workload.subject),
		    format!("Failed to read the {} of {}: {}", workload.kind.as_str(), workload.subject, err),
		),
		Some(err),
	    ),
	}
    }

    pub fn desired_status(&self, conditions: &[api::Condition]) -> api::AgentStatus {
	let mut status = self.old.clone().unwrap_or_default();

	// availability of workloads the owner no longer runs
	if let Some(existing) = status.conditions.as_mut() {
	    existing.retain(|c| {
		!is_availability_condition(&c.type_) || self.workloads.iter().any(|w| w.condition == c.type_)
	    });
	}

	for condition in conditions {
	    status.set_condition(condition.clone());
	}
	status.observed_generation = self.generation;
	status.operator_version = Some(self.operator_version.clone());
	status
    }

    fn changed(&self, condition: &api::Condition) -> bool {
	let old = self.old.as_ref().and_then(|status| status.condition(&condition.type_));
	!old.is_some_and(|old| old.status == condition.status && old.reason == condition.reason)
    }

    async fn fire_event(&self, reference: &ObjectReference, condition: &api::Condition) {
	let event = KubeEvent {
	    type_: match condition.status {
		api::ConditionStatus::True => KubeEventType::Normal,
		_ => KubeEventType::Warning,
	    },
	    reason: condition.reason.clone(),
	    note: Some(truncate(condition.message.clone(), MAX_NOTE_LEN)),
	    action: EVENT_ACTION.to_string(),
	    secondary: None,
	};

	if let Err(err) = self.client.publish_event(reference, &event).await {
	    log::warn!("Failed to publish event {} for {}: {}", condition.reason, condition.type_, err);
	}
    }

    pub async fn update_status(&self, result: &Result<KubeAction, Error>) -> Result<(), Error> {
	let (target, reference) = match (&self.target, &self.reference) {
	    (Some(target), Some(reference)) => (target, reference),
	    _ => return Ok(()),
	};
	let mut errors = MultiErrorBuilder::new();

	let mut conditions = vec![self.reconcile_condition(result)];
	for workload in &self.workloads {
	    let (condition, err) = self.availability_condition(workload).await;
	    if let Some(err) = err {
		log::warn!("Failed to read availability of {} for {}: {}", workload.subject, target, err);
		errors.add_err(err);
	    }
	    conditions.push(condition);
	}

	let status = self.desired_status(&conditions);
	if self.old.as_ref() == Some(&status) {
	    log::debug!("Status of {} is unchanged", target);
	    return errors.build();
	}

	let patch = serde_json::json!({ "status": status });
	match ignore_not_found(self.client.patch_status(target, &patch).await) {
	    Ok(Some(())) => {
		for condition in conditions.iter().filter(|c| self.changed(c)) {
		    self.fire_event(reference, condition).await;
		}
	    }
	    Ok(None) => log::debug!("{} is gone, skipping status update", target),
	    Err(err) => errors.add_err(err),
	}

	errors.build()
    }
}

fn is_availability_condition(type_: &str) -> bool {
    type_ == CONDITION_ALL_AGENTS_AVAILABLE || type_ == CONDITION_ALL_K8S_SENSORS_AVAILABLE
}

/* every desired pod scheduled, available and running the current template */
fn daemon_set_is_available(daemon_set: &DaemonSet) -> bool {
    let status = match &daemon_set.status {
	Some(status) => status,
	None => return false,
    };

    daemon_set.metadata.generation == status.observed_generation
	&& status.number_misscheduled == 0
	&& status.number_available.unwrap_or_default() == status.desired_number_scheduled
	&& status.updated_number_scheduled.unwrap_or_default() == status.desired_number_scheduled
}

/* available, rolled out to the newest replica set and without replica failures */
fn deployment_is_available(deployment: &Deployment) -> bool {
    let status = match &deployment.status {
	Some(status) => status,
	None => return false,
    };
    let condition = |type_: &str| status.conditions.iter().flatten().find(|c| c.type_ == type_);

    deployment.metadata.generation == status.observed_generation
	&& condition("Available").is_some_and(|c| c.status == "True")
	&& condition("Progressing")
	    .is_some_and(|c| c.status == "True" && c.reason.as_deref() == Some("NewReplicaSetAvailable"))
	&& !condition("ReplicaFailure").is_some_and(|c| c.status == "True")
}

fn truncate(mut message: String, max: usize) -> String {
    if message.len() > max {
	let mut end = max;
	while !message.is_char_boundary(end) {
	    end -= 1;
	}
	message.truncate(end);
    }
    message
}
