use serde::{Deserialize, Serialize};

/// Authenticated principal, already resolved by the session layer.
///
/// Login, token issuance and SSO live outside this crate; every core
/// operation receives one of these instead of a raw request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Actor {
    Practitioner { id: i64 },
    Patient { id: i64 },
    Superuser,
}

impl Actor {
    pub fn is_practitioner(&self) -> bool {
        matches!(self, Actor::Practitioner { .. })
    }

    pub fn is_patient(&self) -> bool {
        matches!(self, Actor::Patient { .. })
    }

    pub fn is_superuser(&self) -> bool {
        matches!(self, Actor::Superuser)
    }

    pub fn practitioner_id(&self) -> Option<i64> {
        match self {
            Actor::Practitioner { id } => Some(*id),
            _ => None,
        }
    }

    pub fn patient_id(&self) -> Option<i64> {
        match self {
            Actor::Patient { id } => Some(*id),
            _ => None,
        }
    }
}
