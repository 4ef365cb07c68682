use serde::{Deserialize, Serialize};
use std::fmt;

/// Durable identifier of a principal in the user store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(i64);

impl PrincipalId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for PrincipalId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// What a session stores to say "authenticated as X": the id and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalReference(PrincipalId);

impl PrincipalReference {
    pub fn of(principal: &Principal) -> Self {
        Self(principal.id)
    }

    pub fn id(&self) -> PrincipalId {
        self.0
    }
}

impl From<PrincipalId> for PrincipalReference {
    fn from(id: PrincipalId) -> Self {
        Self(id)
    }
}

/// An authenticated identity, as fetched from the principal store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Request-scoped authentication outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Authentication {
    #[default]
    Anonymous,
    Authenticated(Principal),
}

impl Authentication {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Authentication::Authenticated(_))
    }

    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Authentication::Authenticated(principal) => Some(principal),
            Authentication::Anonymous => None,
        }
    }
}
