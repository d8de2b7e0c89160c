mod builder;
mod builders;
mod client;
mod config;
mod controller;
mod dependent;
mod discovery;
mod errors;
mod finalizer;
mod legacy;
mod lifecycle;
mod multierror;
mod outcome;
mod owner;
mod pipeline;
mod reconciler;
mod status;
mod transform;

#[cfg(test)]
mod testing;

use config::Config;
use controller::AgentManager;
use errors::Error;

use clap::Parser;
use kube::Client as KubeClient;
use log;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level)).init();

    log::info!("Starting agentm {} as field manager {}", config.operator_version, config.field_manager);

    let kube_client = KubeClient::try_default().await?;
    let mgr = AgentManager::new(kube_client, Arc::new(config));
    tokio::select! {
	_ = mgr.agent_controller() => {},
	_ = mgr.remote_agent_controller() => {},

	// handle CTRL^C as gracefully as we can.
	_ = tokio::signal::ctrl_c() => {
	    log::info!("Shutting down");
	},
    }
    Ok(())
}
