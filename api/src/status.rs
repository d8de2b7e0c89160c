use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {

    #[serde(rename = "type")]
    pub type_: String,

    pub status: ConditionStatus,

    pub reason: String,

    pub message: String,

    pub observed_generation: Option<i64>,

    /* RFC3339; only moves when `status` changes */
    pub last_transition_time: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {

    pub conditions: Option<Vec<Condition>>,

    // generation of the spec the conditions refer to
    pub observed_generation: Option<i64>,

    pub operator_version: Option<String>,
}

impl AgentStatus {

    pub fn condition(&self, type_: &str) -> Option<&Condition> {
	self.conditions
	    .as_ref()
	    .and_then(|conditions| conditions.iter().find(|c| c.type_ == type_))
    }

    /*
     * Inserts or replaces the condition with the same type. The transition
     * time of an existing condition is kept unless its status flips.
     */
    pub fn set_condition(&mut self, mut condition: Condition) {
	let conditions = self.conditions.get_or_insert_with(Vec::new);

	match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
	    Some(existing) => {
		if existing.status == condition.status {
		    condition.last_transition_time = existing.last_transition_time.clone();
		}
		*existing = condition;
	    }
	    None => conditions.push(condition),
	}
    }
}
