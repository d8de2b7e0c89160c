use crate::builder::ObjectBuilder;
use crate::client::{delete_all_in_time_limit, ApplyClient, ApplyMode};
use crate::config::DeleteLimits;
use crate::dependent::DependentRef;
use crate::errors::Error;
use crate::lifecycle::{DependentSet, LifecycleRecord};
use crate::multierror::MultiErrorBuilder;
use crate::outcome::Outcome;
use crate::transform::Transformer;

use kube::api::DynamicObject;
use log;

struct Candidate {
    target: DependentRef,
    object: DynamicObject,
}

/*
 * ApplyPipeline converges the dependents of one owner:
 *
 *   build -> transform -> dry-run all -> write record -> commit all -> collect orphans
 *
 * A failing stage ends the pipeline; dry-run and commit still attempt every
 * candidate first so that all failures of the stage are reported together.
 */
pub struct ApplyPipeline<'a> {
    client: &'a dyn ApplyClient,
    transformer: &'a Transformer,
    record: &'a LifecycleRecord<'a>,
    limits: DeleteLimits,
}

impl<'a> ApplyPipeline<'a> {

    pub fn new(
	client: &'a dyn ApplyClient,
	transformer: &'a Transformer,
	record: &'a LifecycleRecord<'a>,
	limits: DeleteLimits,
    ) -> Self {
	Self {
	    client,
	    transformer,
	    record,
	    limits,
	}
    }

    pub async fn apply_all(&self, builders: &[Box<dyn ObjectBuilder>]) -> Outcome {
	match self.run(builders).await {
	    Ok(()) => Outcome::Continue,
	    Err(err) => Outcome::Failure(err),
	}
    }

    async fn run(&self, builders: &[Box<dyn ObjectBuilder>]) -> Result<(), Error> {
	// must be read before it gets overwritten below
	let previous = self.record.read().await?;

	let candidates = self.candidates(builders)?;
	let current: DependentSet = candidates.iter().map(|c| c.target.clone()).collect();
	let orphans: DependentSet = previous.difference(&current).cloned().collect();

	self.apply_each(&candidates, ApplyMode::DryRun).await?;

	self.record.write(&current, &orphans).await?;

	self.apply_each(&candidates, ApplyMode::Commit).await?;

	if orphans.is_empty() {
	    return Ok(());
	}

	let orphans: Vec<DependentRef> = orphans.into_iter().collect();
	log::info!("Deleting {} orphaned dependent(s) of {}", orphans.len(), self.record.target());
	delete_all_in_time_limit(self.client, &orphans, self.limits).await?;

	self.record.write(&current, &DependentSet::new()).await
    }

    fn candidates(&self, builders: &[Box<dyn ObjectBuilder>]) -> Result<Vec<Candidate>, Error> {
	let mut errors = MultiErrorBuilder::new();
	let mut candidates = Vec::new();

	for builder in builders {
	    let built = match errors.add(builder.build()) {
		Some(Some(built)) => built,
		Some(None) => {
		    log::debug!("Builder {} produced no object", builder.component_name());
		    continue;
		}
		None => continue,
	    };

	    let object = self.transformer.transform(built, builder.component_name(), builder.is_namespaced());
	    if let Some(target) = errors.add(DependentRef::from_object(&object)) {
		candidates.push(Candidate { target, object });
	    }
	}

	errors.build()?;
	Ok(candidates)
    }

    async fn apply_each(&self, candidates: &[Candidate], mode: ApplyMode) -> Result<(), Error> {
	let mut errors = MultiErrorBuilder::new();

	for candidate in candidates {
	    if let Err(err) = self.client.apply(&candidate.object, mode).await {
		log::error!("Failed to apply {} ({:?}): {}", candidate.target, mode, err);
		errors.add_err(err);
	    }
	}

	errors.build()
    }
}
