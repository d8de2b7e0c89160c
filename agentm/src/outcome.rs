use crate::errors::Error;

use kube::runtime::controller::Action as KubeAction;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requeue {
    /* the state machine has more work to do right away */
    Now,
    /* nothing left to do until the owner changes */
    Never,
}

/*
 * Outcome is threaded through every reconcile stage. `Continue` lets the next
 * stage run, the other two end the reconcile.
 */
#[derive(Debug)]
pub enum Outcome {
    Continue,
    Success(Requeue),
    Failure(Error),
}

impl Outcome {

    pub fn is_continue(&self) -> bool {
	matches!(self, Outcome::Continue)
    }

    /*
     * A remaining `Continue` means every stage ran, which is a converged
     * reconcile.
     */
    pub fn into_action(self, resync: Duration) -> Result<KubeAction, Error> {
	match self {
	    Outcome::Continue => Ok(KubeAction::requeue(resync)),
	    Outcome::Success(Requeue::Now) => Ok(KubeAction::requeue(Duration::ZERO)),
	    Outcome::Success(Requeue::Never) => Ok(KubeAction::await_change()),
	    Outcome::Failure(err) => Err(err),
	}
    }
}

impl From<Result<(), Error>> for Outcome {
    fn from(result: Result<(), Error>) -> Self {
	match result {
	    Ok(()) => Outcome::Continue,
	    Err(err) => Outcome::Failure(err),
	}
    }
}
