//! Scenario context supplied by the external scenario provider.
//!
//! The surrounding application selects a training scenario (an irate
//! subscriber, a confused first-time buyer, …) and hands this core an opaque
//! instruction block that shapes the simulated customer's behavior. The core
//! never interprets it — it is forwarded verbatim to the remote voice service
//! at session setup.

use serde::{Deserialize, Serialize};

/// Opaque scenario handed to the core at session creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioContext {
    /// Session-opaque identifier assigned by the scenario provider.
    pub id: String,
    /// Instruction text shaping the simulated customer.
    pub instructions: String,
}

impl ScenarioContext {
    pub fn new(id: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            instructions: instructions.into(),
        }
    }
}
