// --- File: crates/tutorbook_booking/src/context.rs ---
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Who asked for a lifecycle operation.
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    Tutor,
    #[serde(rename = "student", alias = "payer")]
    Payer,
    Admin,
    System,
}

impl Actor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Actor::Tutor => "tutor",
            Actor::Payer => "student",
            Actor::Admin => "admin",
            Actor::System => "system",
        }
    }

    pub(crate) fn tutor() -> Self {
        Actor::Tutor
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Actor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tutor" => Ok(Actor::Tutor),
            "student" | "payer" => Ok(Actor::Payer),
            "admin" => Ok(Actor::Admin),
            "system" => Ok(Actor::System),
            other => Err(format!("unknown actor '{other}'")),
        }
    }
}

/// Explicit caller context passed to every orchestrator operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub actor: Actor,
    pub request_id: String,
}

impl RequestContext {
    pub fn new(actor: Actor) -> Self {
        Self {
            actor,
            request_id: Uuid::new_v4().to_string(),
        }
    }

    /// Context of the background expiry sweep.
    pub fn system() -> Self {
        Self::new(Actor::System)
    }

    /// Same request, different actor.
    pub fn with_actor(&self, actor: Actor) -> Self {
        Self {
            actor,
            request_id: self.request_id.clone(),
        }
    }
}
