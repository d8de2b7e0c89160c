use clap::Parser;
use std::time::Duration;

/*
 * Command line (and environment) configuration of the agent manager.
 */
#[derive(Clone, Debug, Parser)]
#[command(name = "agentm", version, about = "Reconciles Agent and RemoteAgent resources")]
pub struct Config {

    /// Field manager used for server-side apply
    #[arg(long, env = "AGENTM_FIELD_MANAGER", default_value = "agentm")]
    pub field_manager: String,

    /// Operator version stamped on every managed object
    #[arg(long, env = "AGENTM_VERSION", default_value = env!("CARGO_PKG_VERSION"))]
    pub operator_version: String,

    /// Seconds to wait before re-checking a successfully reconciled resource
    #[arg(long, env = "AGENTM_RESYNC_SECONDS", default_value_t = 300)]
    pub resync_interval: u64,

    /// Seconds to wait before retrying a failed reconcile
    #[arg(long, env = "AGENTM_ERROR_REQUEUE_SECONDS", default_value_t = 60)]
    pub error_requeue: u64,

    /// Upper bound, in seconds, for deleted dependents to disappear
    #[arg(long, env = "AGENTM_DELETE_TIMEOUT_SECONDS", default_value_t = 30)]
    pub delete_timeout: u64,

    /// Seconds between existence checks while waiting for deletions
    #[arg(long, env = "AGENTM_DELETE_POLL_SECONDS", default_value_t = 5)]
    pub delete_poll: u64,

    /// Default log filter when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/*
 * Bounds applied while waiting for deleted objects to go away.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeleteLimits {
    pub timeout: Duration,
    pub poll: Duration,
}

impl Config {

    pub fn resync_interval(&self) -> Duration {
	Duration::from_secs(self.resync_interval)
    }

    pub fn error_requeue(&self) -> Duration {
	Duration::from_secs(self.error_requeue)
    }

    pub fn delete_limits(&self) -> DeleteLimits {
	DeleteLimits {
	    timeout: Duration::from_secs(self.delete_timeout),
	    poll: Duration::from_secs(self.delete_poll),
	}
    }
}
