use crate::client::ApplyClient;
use crate::dependent::DependentRef;
use crate::errors::Error;

use kube::api::ObjectMeta;
use log;

/* finalizer of owners created by the Helm based operator */
pub const FINALIZER_V1: &str = "agents.runfc.br/finalizer";
pub const FINALIZER_V3: &str = "agents.runfc.br/finalizer-v3";

/*
 * Lifecycle of an owner, as far as the engine is concerned. It is derived
 * from the deletion timestamp and the finalizers on every reconcile.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Active { legacy: bool, current: bool },
    DeletingLegacy,
    DeletingDependents,
    Terminated,
}

fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
	.as_ref()
	.is_some_and(|finalizers| finalizers.iter().any(|f| f == finalizer))
}

pub fn state_of(meta: &ObjectMeta) -> LifecycleState {
    let legacy = has_finalizer(meta, FINALIZER_V1);
    let current = has_finalizer(meta, FINALIZER_V3);

    if meta.deletion_timestamp.is_none() {
	return LifecycleState::Active { legacy, current };
    }

    match (legacy, current) {
	(true, _) => LifecycleState::DeletingLegacy,
	(false, true) => LifecycleState::DeletingDependents,
	(false, false) => LifecycleState::Terminated,
    }
}

/*
 * Writes the full finalizer list guarded by the owner's resourceVersion, so a
 * concurrent change of the owner makes the patch fail with a conflict instead
 * of dropping someone else's finalizer.
 */
async fn write_finalizers(
    client: &dyn ApplyClient,
    target: &DependentRef,
    meta: &ObjectMeta,
    finalizers: Vec<String>,
) -> Result<(), Error> {
    let mut patch = serde_json::json!({
	"metadata": {
	    "finalizers": finalizers,
	}
    });
    if let Some(version) = &meta.resource_version {
	patch["metadata"]["resourceVersion"] = serde_json::Value::from(version.as_str());
    }

    client.patch(target, &patch).await
}

pub async fn add_finalizer(
    client: &dyn ApplyClient,
    target: &DependentRef,
    meta: &ObjectMeta,
    finalizer: &str,
) -> Result<(), Error> {
    let mut finalizers = meta.finalizers.clone().unwrap_or_default();
    if finalizers.iter().any(|f| f == finalizer) {
	return Ok(());
    }
    finalizers.push(finalizer.to_string());

    log::debug!("Adding finalizer {} to {}", finalizer, target);
    write_finalizers(client, target, meta, finalizers).await
}

pub async fn remove_finalizer(
    client: &dyn ApplyClient,
    target: &DependentRef,
    meta: &ObjectMeta,
    finalizer: &str,
) -> Result<(), Error> {
    let finalizers: Vec<String> = meta
	.finalizers
	.clone()
	.unwrap_or_default()
	.into_iter()
	.filter(|f| f != finalizer)
	.collect();

    log::debug!("Removing finalizer {} from {}", finalizer, target);
    write_finalizers(client, target, meta, finalizers).await
}
