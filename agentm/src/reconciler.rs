use crate::builders::BuilderSource;
use crate::client::ApplyClient;
use crate::config::Config;
use crate::dependent::DependentRef;
use crate::errors::Error;
use crate::finalizer::{add_finalizer, remove_finalizer, state_of, LifecycleState, FINALIZER_V1, FINALIZER_V3};
use crate::legacy::LegacyUninstaller;
use crate::lifecycle::LifecycleRecord;
use crate::multierror;
use crate::outcome::{Outcome, Requeue};
use crate::owner::{from_dynamic, owner_key, owner_ref, Owner};
use crate::pipeline::ApplyPipeline;
use crate::status::StatusManager;
use crate::transform::Transformer;

use futures::FutureExt;
use kube::api::ObjectMeta;
use kube::runtime::controller::Action as KubeAction;
use log;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/*
 * Reconciler drives one owner kind. Every call converges a single owner and
 * is safe to repeat; the controller runtime guarantees that calls for the
 * same owner never overlap.
 */
pub struct Reconciler<K: Owner> {
    client: Arc<dyn ApplyClient>,
    builders: Arc<dyn BuilderSource<K>>,
    legacy: Arc<dyn LegacyUninstaller>,
    config: Arc<Config>,
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
	return message.to_string();
    }
    if let Some(message) = panic.downcast_ref::<String>() {
	return message.clone();
    }
    String::from("unknown panic")
}

async fn catch_panic<T, F>(future: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
	Ok(result) => result,
	Err(panic) => {
	    let message = panic_message(panic.as_ref());
	    log::error!("Recovered from panic: {}", message);
	    Err(Error::Panic(message))
	}
    }
}

/*
 * Writes to the owner itself: the owner vanishing in the meantime means
 * there is nothing left to do.
 */
fn owner_write(result: Result<(), Error>, then: Outcome) -> Outcome {
    match result {
	Ok(()) => then,
	Err(err) if err.is_not_found() => Outcome::Success(Requeue::Never),
	Err(err) => Outcome::Failure(err),
    }
}

impl<K: Owner> Reconciler<K> {

    pub fn new(
	client: Arc<dyn ApplyClient>,
	builders: Arc<dyn BuilderSource<K>>,
	legacy: Arc<dyn LegacyUninstaller>,
	config: Arc<Config>,
    ) -> Self {
	Self {
	    client,
	    builders,
	    legacy,
	    config,
	}
    }

    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<KubeAction, Error> {
	catch_panic(self.reconcile_owner(namespace, name)).await
    }

    async fn reconcile_owner(&self, namespace: &str, name: &str) -> Result<KubeAction, Error> {
	let target = DependentRef::of::<K>(Some(namespace), name);

	let owner: K = match self.client.get(&target).await? {
	    Some(obj) => from_dynamic(obj)?,
	    None => {
		log::debug!("{} no longer exists", target);
		return Ok(KubeAction::await_change());
	    }
	};
	let key = owner_key(&owner);
	log::info!("Reconciling {} {}", K::kind(&()), key);

	let mut status = StatusManager::new(self.client.clone(), &self.config.operator_version);
	status.set_owner_old(&owner);

	let resync = self.config.resync_interval();
	let result = catch_panic(async { self.converge(&owner).await.into_action(resync) }).await;

	match &result {
	    Ok(action) => log::info!("Reconciled {}: {:?}", key, action),
	    Err(err) if err.is_conflict() => log::info!("{} changed while reconciling, retrying later", key),
	    Err(err) => log::error!("Failed to reconcile {} ({} error(s)): {}", key, err.count(), err),
	}

	let published = catch_panic(status.update_status(&result)).await;
	if let Err(err) = &published {
	    log::error!("Failed to update status of {}: {}", key, err);
	}

	multierror::merge(result, published)
    }

    async fn converge(&self, owner: &K) -> Outcome {
	let key = owner_key(owner);
	let target = match owner_ref(owner) {
	    Ok(target) => target,
	    Err(err) => return Outcome::Failure(err),
	};
	let transformer = match Transformer::new(owner, &self.config.operator_version) {
	    Ok(transformer) => transformer,
	    Err(err) => return Outcome::Failure(err),
	};
	let record = LifecycleRecord::new(self.client.as_ref(), &transformer, self.config.delete_limits());
	let meta = owner.meta();

	let state = state_of(meta);
	log::debug!("{} is {:?}", key, state);

	let outcome = match state {
	    LifecycleState::Terminated => Outcome::Success(Requeue::Never),
	    LifecycleState::DeletingLegacy => self.uninstall_legacy(&target, meta).await,
	    LifecycleState::DeletingDependents => self.delete_dependents(&target, meta, &record).await,
	    LifecycleState::Active { legacy: true, .. } => self.uninstall_legacy(&target, meta).await,
	    LifecycleState::Active { current: false, .. } => {
		let added = add_finalizer(self.client.as_ref(), &target, meta, FINALIZER_V3).await;
		owner_write(added, Outcome::Continue)
	    }
	    LifecycleState::Active { .. } => Outcome::Continue,
	};
	if !outcome.is_continue() {
	    return outcome;
	}

	let builders = match self.builders.builders(owner).await {
	    Ok(builders) => builders,
	    Err(err) => return Outcome::Failure(err),
	};

	ApplyPipeline::new(self.client.as_ref(), &transformer, &record, self.config.delete_limits())
	    .apply_all(&builders)
	    .await
    }

    /*
     * Owners created by the Helm based operator carry the legacy finalizer.
     * Their release is removed first, and the finalizer with it.
     */
    async fn uninstall_legacy(&self, target: &DependentRef, meta: &ObjectMeta) -> Outcome {
	let namespace = target.namespace.as_deref().unwrap_or_default();

	if let Err(err) = self.legacy.uninstall(namespace, &target.name).await {
	    return Outcome::Failure(err);
	}

	let removed = remove_finalizer(self.client.as_ref(), target, meta, FINALIZER_V1).await;
	owner_write(removed, Outcome::Success(Requeue::Now))
    }

    async fn delete_dependents(&self, target: &DependentRef, meta: &ObjectMeta, record: &LifecycleRecord<'_>) -> Outcome {
	log::info!("{} is being deleted, removing its dependents", target);

	if let Err(err) = record.delete_all().await {
	    return Outcome::Failure(err);
	}

	let removed = remove_finalizer(self.client.as_ref(), target, meta, FINALIZER_V3).await;
	owner_write(removed, Outcome::Success(Requeue::Never))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{to_dynamic, ObjectBuilder};
    use crate::status::CONDITION_RECONCILE_SUCCEEDED;
    use crate::testing::{config_map, CallKind, FakeClient};
    use agent_api as api;
    use async_trait::async_trait;
    use clap::Parser;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use k8s_openapi::chrono::Utc;
    use kube::api::DynamicObject;
    use std::sync::Mutex;
    use std::time::Duration;

    struct NamedConfigMap(String);

    impl ObjectBuilder for NamedConfigMap {
	fn component_name(&self) -> &str {
	    "test"
	}

	fn is_namespaced(&self) -> bool {
	    true
	}

	fn build(&self) -> Result<Option<DynamicObject>, Error> {
	    Ok(Some(config_map("agents", &self.0)))
	}
    }

    struct StaticBuilders(Vec<&'static str>);

    #[async_trait]
    impl BuilderSource<api::Agent> for StaticBuilders {
	async fn builders(&self, _owner: &api::Agent) -> Result<Vec<Box<dyn ObjectBuilder>>, Error> {
	    Ok(self
		.0
		.iter()
		.map(|name| Box::new(NamedConfigMap(name.to_string())) as Box<dyn ObjectBuilder>)
		.collect())
	}
    }

    struct PanickingBuilders;

    #[async_trait]
    impl BuilderSource<api::Agent> for PanickingBuilders {
	async fn builders(&self, _owner: &api::Agent) -> Result<Vec<Box<dyn ObjectBuilder>>, Error> {
	    panic!("builder blew up")
	}
    }

    #[derive(Default)]
    struct RecordingUninstaller {
	releases: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LegacyUninstaller for RecordingUninstaller {
	async fn uninstall(&self, namespace: &str, release: &str) -> Result<(), Error> {
	    self.releases.lock().unwrap().push(format!("{}/{}", namespace, release));
	    Ok(())
	}
    }

    struct Harness {
	client: Arc<FakeClient>,
	legacy: Arc<RecordingUninstaller>,
	reconciler: Reconciler<api::Agent>,
    }

    fn config() -> Arc<Config> {
	Arc::new(Config::parse_from([
	    "agentm",
	    "--operator-version",
	    "1.0.0",
	    "--delete-timeout",
	    "2",
	    "--delete-poll",
	    "0",
	]))
    }

    fn harness_with(builders: Arc<dyn BuilderSource<api::Agent>>) -> Harness {
	let client = Arc::new(FakeClient::new());
	let legacy = Arc::new(RecordingUninstaller::default());
	let reconciler = Reconciler::new(client.clone(), builders, legacy.clone(), config());

	Harness { client, legacy, reconciler }
    }

    fn harness(names: Vec<&'static str>) -> Harness {
	harness_with(Arc::new(StaticBuilders(names)))
    }

    fn owner(deleting: bool, finalizers: &[&str]) -> api::Agent {
	let mut agent = api::Agent::new("demo", api::AgentSpec::default());
	agent.metadata.namespace = Some(String::from("agents"));
	agent.metadata.uid = Some(String::from("uid-1"));
	agent.metadata.generation = Some(1);
	agent.metadata.finalizers = Some(finalizers.iter().map(|f| f.to_string()).collect());
	if deleting {
	    agent.metadata.deletion_timestamp = Some(Time(Utc::now()));
	}
	agent
    }

    fn cm(name: &str) -> DependentRef {
	DependentRef::new("v1", "ConfigMap", Some("agents"), name)
    }

    fn reread(h: &Harness, target: &DependentRef) -> Option<api::Agent> {
	h.client.object(target).map(|obj| from_dynamic(obj).unwrap())
    }

    fn condition(agent: &api::Agent) -> api::Condition {
	agent.status.as_ref().unwrap().condition(CONDITION_RECONCILE_SUCCEEDED).unwrap().clone()
    }

    #[tokio::test]
    async fn creation_adds_finalizer_and_applies() {
	let h = harness(vec!["a", "b", "c", "d"]);
	let target = h.client.insert(to_dynamic(&owner(false, &[])).unwrap());

	let action = h.reconciler.reconcile("agents", "demo").await.unwrap();

	assert_eq!(action, KubeAction::requeue(Duration::from_secs(300)));
	let agent = reread(&h, &target).unwrap();
	assert_eq!(agent.metadata.finalizers.clone().unwrap(), vec![String::from(FINALIZER_V3)]);
	assert_eq!(condition(&agent).status, api::ConditionStatus::True);
	assert_eq!(h.client.calls_of(CallKind::DryRun).len(), 4);
	for name in ["a", "b", "c", "d"] {
	    assert!(h.client.contains(&cm(name)));
	}
    }

    #[tokio::test]
    async fn repeated_reconcile_is_a_no_op() {
	let h = harness(vec!["a", "b"]);
	h.client.insert(to_dynamic(&owner(false, &[])).unwrap());
	h.reconciler.reconcile("agents", "demo").await.unwrap();
	h.client.reset_calls();

	h.reconciler.reconcile("agents", "demo").await.unwrap();

	assert!(h.client.calls_of(CallKind::Patch).is_empty());
	assert!(h.client.calls_of(CallKind::PatchStatus).is_empty());
	assert!(h.client.calls_of(CallKind::Delete).is_empty());
    }

    #[tokio::test]
    async fn deletion_removes_recorded_dependents_then_finalizer() {
	let h = harness(vec!["a", "b"]);
	let target = h.client.insert(to_dynamic(&owner(false, &[])).unwrap());
	h.reconciler.reconcile("agents", "demo").await.unwrap();

	// the user deletes the owner
	h.client.insert(to_dynamic(&owner(true, &[FINALIZER_V3])).unwrap());
	h.client.reset_calls();

	let action = h.reconciler.reconcile("agents", "demo").await.unwrap();

	assert_eq!(action, KubeAction::await_change());
	let deleted = h.client.targets_of(CallKind::Delete);
	assert_eq!(deleted[..2], [cm("a"), cm("b")]);
	assert_eq!(deleted[2], cm("demo-agent-dependents"));
	assert!(h.client.calls_of(CallKind::DryRun).is_empty());
	assert!(h.client.calls_of(CallKind::Apply).is_empty());
	assert!(!h.client.contains(&target));

	let calls = h.client.calls();
	let last_delete = calls.iter().rposition(|c| c.kind() == CallKind::Delete).unwrap();
	let finalizer_patch = calls.iter().position(|c| c.kind() == CallKind::Patch).unwrap();
	assert!(last_delete < finalizer_patch);
    }

    #[tokio::test]
    async fn legacy_finalizer_goes_first() {
	let h = harness(vec!["a"]);
	let target = h.client.insert(to_dynamic(&owner(true, &[FINALIZER_V1, FINALIZER_V3])).unwrap());

	let action = h.reconciler.reconcile("agents", "demo").await.unwrap();

	assert_eq!(action, KubeAction::requeue(Duration::ZERO));
	assert_eq!(*h.legacy.releases.lock().unwrap(), vec![String::from("agents/demo")]);
	assert!(h.client.calls_of(CallKind::Delete).is_empty());
	let agent = reread(&h, &target).unwrap();
	assert_eq!(agent.metadata.finalizers.unwrap(), vec![String::from(FINALIZER_V3)]);

	h.reconciler.reconcile("agents", "demo").await.unwrap();
	assert!(!h.client.contains(&target));
    }

    #[tokio::test]
    async fn legacy_owner_is_migrated_before_applying() {
	let h = harness(vec!["a"]);
	let target = h.client.insert(to_dynamic(&owner(false, &[FINALIZER_V1])).unwrap());

	let action = h.reconciler.reconcile("agents", "demo").await.unwrap();

	assert_eq!(action, KubeAction::requeue(Duration::ZERO));
	assert_eq!(h.legacy.releases.lock().unwrap().len(), 1);
	assert!(h.client.calls_of(CallKind::DryRun).is_empty());

	h.reconciler.reconcile("agents", "demo").await.unwrap();
	let agent = reread(&h, &target).unwrap();
	assert_eq!(agent.metadata.finalizers.unwrap(), vec![String::from(FINALIZER_V3)]);
	assert!(h.client.contains(&cm("a")));
    }

    #[tokio::test]
    async fn missing_owner_is_not_an_error() {
	let h = harness(vec!["a"]);

	let action = h.reconciler.reconcile("agents", "demo").await.unwrap();

	assert_eq!(action, KubeAction::await_change());
	assert_eq!(h.client.calls().len(), 1);
    }

    #[tokio::test]
    async fn finished_deletion_touches_nothing() {
	let h = harness(vec!["a"]);
	h.client.insert(to_dynamic(&owner(true, &["someone.else/finalizer"])).unwrap());

	let action = h.reconciler.reconcile("agents", "demo").await.unwrap();

	assert_eq!(action, KubeAction::await_change());
	assert!(h.client.calls_of(CallKind::Delete).is_empty());
	assert!(h.client.calls_of(CallKind::Apply).is_empty());
	assert!(h.client.calls_of(CallKind::Patch).is_empty());
    }

    #[tokio::test]
    async fn finalizer_conflict_fails_before_applying() {
	let h = harness(vec!["a"]);
	let target = h.client.insert(to_dynamic(&owner(false, &[])).unwrap());
	h.client.fail(CallKind::Patch, &target, 409);

	let err = h.reconciler.reconcile("agents", "demo").await.unwrap_err();

	assert_eq!(err.count(), 1);
	assert!(h.client.calls_of(CallKind::DryRun).is_empty());
	assert_eq!(condition(&reread(&h, &target).unwrap()).status, api::ConditionStatus::False);
    }

    #[tokio::test]
    async fn dry_run_failure_is_published() {
	let h = harness(vec!["a", "b", "c"]);
	let target = h.client.insert(to_dynamic(&owner(false, &[FINALIZER_V3])).unwrap());
	h.client.fail(CallKind::DryRun, &cm("b"), 422);

	let err = h.reconciler.reconcile("agents", "demo").await.unwrap_err();

	assert_eq!(err.count(), 1);
	assert_eq!(h.client.calls_of(CallKind::DryRun).len(), 3);
	assert!(h.client.calls_of(CallKind::Apply).is_empty());
	let published = condition(&reread(&h, &target).unwrap());
	assert_eq!(published.reason, "ReconcileFailed");
    }

    #[tokio::test]
    async fn status_failure_is_merged_into_the_result() {
	let h = harness(vec!["a"]);
	let target = h.client.insert(to_dynamic(&owner(false, &[FINALIZER_V3])).unwrap());
	h.client.fail(CallKind::PatchStatus, &target, 500);

	let err = h.reconciler.reconcile("agents", "demo").await.unwrap_err();

	assert_eq!(err.count(), 1);
	assert!(h.client.contains(&cm("a")));
    }

    #[tokio::test]
    async fn outcome_is_announced_through_events() {
	let h = harness(vec!["a"]);
	let target = h.client.insert(to_dynamic(&owner(false, &[FINALIZER_V3])).unwrap());
	h.client.fail(CallKind::DryRun, &cm("a"), 422);

	h.reconciler.reconcile("agents", "demo").await.unwrap_err();
	let failed = h.client.events();
	assert!(failed.iter().any(|event| event.target == target && event.warning && event.reason == "ReconcileFailed"));

	h.client.clear_failures();
	h.client.reset_calls();
	h.reconciler.reconcile("agents", "demo").await.unwrap();

	let events = h.client.events();
	assert_eq!(events.len(), 1);
	assert_eq!(events[0].reason, "ReconcileSucceeded");
	assert!(!events[0].warning);
    }

    #[tokio::test]
    async fn panics_become_errors() {
	let h = harness_with(Arc::new(PanickingBuilders));
	let target = h.client.insert(to_dynamic(&owner(false, &[FINALIZER_V3])).unwrap());

	let err = h.reconciler.reconcile("agents", "demo").await.unwrap_err();

	assert!(matches!(err, Error::Panic(ref message) if message == "builder blew up"));
	let published = condition(&reread(&h, &target).unwrap());
	assert!(published.message.contains("builder blew up"));

	// the reconciler is still usable afterwards
	assert!(h.reconciler.reconcile("agents", "other").await.is_ok());
    }
}
