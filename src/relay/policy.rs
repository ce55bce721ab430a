// Participant roles and the role-pair communication policy

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Participant role within a mission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Icc,
    Client,
    Operator,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Icc, Role::Client, Role::Operator];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Icc => "ICC",
            Role::Client => "CLIENT",
            Role::Operator => "OPERATOR",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a role string is not one of the known roles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRole(pub String);

impl fmt::Display for UnknownRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown role: {}", self.0)
    }
}

impl std::error::Error for UnknownRole {}

impl FromStr for Role {
    type Err = UnknownRole;

    /// Roles are matched exactly as asserted, no case folding
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ICC" => Ok(Role::Icc),
            "CLIENT" => Ok(Role::Client),
            "OPERATOR" => Ok(Role::Operator),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// Decide whether `sender` may reach `receiver`.
///
/// ICC is the hub: it talks to CLIENT and OPERATOR, and they talk back to it.
/// Every other pairing is denied, including same-role pairs and ICC to ICC.
pub fn allowed(sender: Role, receiver: Role) -> bool {
    matches!(
        (sender, receiver),
        (Role::Icc, Role::Client | Role::Operator) | (Role::Client | Role::Operator, Role::Icc)
    )
}
