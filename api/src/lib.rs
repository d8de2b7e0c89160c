/*
 * agent/api - defines the custom resources reconciled by the agent manager
 * (agentm) and the status they report back.
 */

pub mod agent;
pub use agent::Agent;
pub use agent::AgentSpec;
pub use agent::BackendSpec;
pub use agent::EtcdSpec;
pub use agent::ImageSpec;
pub use agent::K8sSensorSpec;
pub use agent::ServiceSpec;
pub use agent::ZoneSpec;

pub mod remoteagent;
pub use remoteagent::RemoteAgent;
pub use remoteagent::RemoteAgentSpec;

pub mod status;
pub use status::AgentStatus;
pub use status::Condition;
pub use status::ConditionStatus;
