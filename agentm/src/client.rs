use crate::config::DeleteLimits;
use crate::dependent::DependentRef;
use crate::errors::{ignore_not_found, Error};
use crate::multierror::MultiErrorBuilder;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Api as KubeApi;
use kube::Client as KubeClient;
use kube::api::DeleteParams as KubeDeleteParams;
use kube::api::DynamicObject;
use kube::api::ListParams as KubeListParams;
use kube::api::Patch as KubePatch;
use kube::api::PatchParams as KubePatchParams;
use kube::runtime::events::Event as KubeEvent;
use kube::runtime::events::Recorder as KubeRecorder;
use kube::runtime::events::Reporter as KubeReporter;
use log;

/*
 * Whether an apply only validates the object (dryRun=All) or persists it.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyMode {
    DryRun,
    Commit,
}

/*
 * ApplyClient is the thin seam between the reconciliation engine and the
 * Kubernetes API. Every call returns a Result so that batch operations can
 * aggregate failures.
 */
#[async_trait]
pub trait ApplyClient: Send + Sync {

    /* server-side apply of `obj`, owned by the configured field manager */
    async fn apply(&self, obj: &DynamicObject, mode: ApplyMode) -> Result<DynamicObject, Error>;

    /* `None` when the object does not exist */
    async fn get(&self, target: &DependentRef) -> Result<Option<DynamicObject>, Error>;

    /* deleting an object that is already gone succeeds */
    async fn delete(&self, target: &DependentRef) -> Result<(), Error>;

    /* JSON merge patch of the main resource */
    async fn patch(&self, target: &DependentRef, patch: &serde_json::Value) -> Result<(), Error>;

    /* JSON merge patch of the status subresource */
    async fn patch_status(&self, target: &DependentRef, patch: &serde_json::Value) -> Result<(), Error>;

    /* references of the objects of `template`'s kind and namespace matching `labels` */
    async fn list(&self, template: &DependentRef, labels: &str) -> Result<Vec<DependentRef>, Error>;

    /* Kubernetes Event about `reference`, reported by the field manager */
    async fn publish_event(&self, reference: &ObjectReference, event: &KubeEvent) -> Result<(), Error>;

    async fn exists(&self, target: &DependentRef) -> Result<bool, Error> {
	Ok(self.get(target).await?.is_some())
    }
}

pub struct KubeApplyClient {
    kube_client: KubeClient,
    field_manager: String,
    recorder: KubeRecorder,
}

impl KubeApplyClient {

    pub fn new(kube_client: KubeClient, field_manager: &str) -> Self {
	let reporter = KubeReporter {
	    controller: field_manager.to_string(),
	    instance: None,
	};

	Self {
	    recorder: KubeRecorder::new(kube_client.clone(), reporter),
	    kube_client,
	    field_manager: field_manager.to_string(),
	}
    }

    fn api_for(&self, target: &DependentRef) -> KubeApi<DynamicObject> {
	let resource = target.api_resource();

	match &target.namespace {
	    Some(ns) => KubeApi::namespaced_with(self.kube_client.clone(), ns, &resource),
	    None => KubeApi::all_with(self.kube_client.clone(), &resource),
	}
    }
}

#[async_trait]
impl ApplyClient for KubeApplyClient {

    async fn apply(&self, obj: &DynamicObject, mode: ApplyMode) -> Result<DynamicObject, Error> {
	let target = DependentRef::from_object(obj)?;

	// managed fields are owned by the API server and rejected in an apply body
	let mut obj = obj.clone();
	obj.metadata.managed_fields = None;

	let mut params = KubePatchParams::apply(&self.field_manager).force();
	if mode == ApplyMode::DryRun {
	    params = params.dry_run();
	}

	log::debug!("Applying {} ({:?})", target, mode);
	let applied = self.api_for(&target)
	    .patch(&target.name, &params, &KubePatch::Apply(&obj))
	    .await?;

	Ok(applied)
    }

    async fn get(&self, target: &DependentRef) -> Result<Option<DynamicObject>, Error> {
	Ok(self.api_for(target).get_opt(&target.name).await?)
    }

    async fn delete(&self, target: &DependentRef) -> Result<(), Error> {
	log::debug!("Deleting {}", target);

	let result = self.api_for(target)
	    .delete(&target.name, &KubeDeleteParams::background())
	    .await
	    .map_err(Error::from);

	ignore_not_found(result).map(|_| ())
    }

    async fn patch(&self, target: &DependentRef, patch: &serde_json::Value) -> Result<(), Error> {
	let params = KubePatchParams::default();
	self.api_for(target)
	    .patch(&target.name, &params, &KubePatch::Merge(patch))
	    .await?;

	Ok(())
    }

    async fn patch_status(&self, target: &DependentRef, patch: &serde_json::Value) -> Result<(), Error> {
	let params = KubePatchParams::default();
	self.api_for(target)
	    .patch_status(&target.name, &params, &KubePatch::Merge(patch))
	    .await?;

	Ok(())
    }

    async fn list(&self, template: &DependentRef, labels: &str) -> Result<Vec<DependentRef>, Error> {
	let params = KubeListParams::default().labels(labels);
	let objects = self.api_for(template).list(&params).await?;

	let mut refs = Vec::new();
	for obj in objects {
	    if let Some(name) = obj.metadata.name.as_deref() {
		refs.push(DependentRef {
		    namespace: obj.metadata.namespace.clone(),
		    name: name.to_string(),
		    ..template.clone()
		});
	    }
	}
	Ok(refs)
    }

    async fn publish_event(&self, reference: &ObjectReference, event: &KubeEvent) -> Result<(), Error> {
	log::debug!("Publishing event {} for {:?}/{:?}", event.reason, reference.kind, reference.name);
	self.recorder.publish(event, reference).await?;
	Ok(())
    }
}

/*
 * Deletes every target, then waits until none of them exists anymore.
 *
 * All deletes are attempted even when some fail; the failures are returned as
 * one aggregate and no waiting happens in that case. Waiting is bounded by
 * `limits.timeout` and checks existence every `limits.poll`.
 */
pub async fn delete_all_in_time_limit(
    client: &dyn ApplyClient,
    targets: &[DependentRef],
    limits: DeleteLimits,
) -> Result<(), Error> {
    let mut errors = MultiErrorBuilder::new();
    for target in targets {
	if let Err(err) = client.delete(target).await {
	    log::error!("Unable to delete {}: {}", target, err);
	    errors.add_err(err);
	}
    }
    errors.build()?;

    match tokio::time::timeout(limits.timeout, wait_until_gone(client, targets, limits)).await {
	Ok(()) => Ok(()),
	Err(_) => Err(Error::Timeout(format!(
	    "{} deleted object(s) still present after {:?}",
	    targets.len(),
	    limits.timeout
	))),
    }
}

async fn wait_until_gone(client: &dyn ApplyClient, targets: &[DependentRef], limits: DeleteLimits) {
    loop {
	let mut remaining = 0;
	for target in targets {
	    match client.exists(target).await {
		Ok(false) => {}
		Ok(true) => remaining += 1,
		Err(err) => {
		    log::error!("Failed to verify if {} has finished terminating: {}", target, err);
		    remaining += 1;
		}
	    }
	}

	if remaining == 0 {
	    return;
	}
	log::debug!("Waiting for {} object(s) to terminate", remaining);
	tokio::time::sleep(limits.poll).await;
    }
}
