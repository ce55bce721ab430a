// Resolution of caller-asserted role and mission attributes

use crate::relay::error::RelayError;
use crate::relay::policy::Role;

/// Raw attributes as supplied by a caller (headers, query string or JSON body)
#[derive(Debug, Clone, Default)]
pub struct RoleClaim {
    pub role: Option<String>,
    pub mission_id: Option<String>,
}

impl RoleClaim {
    pub fn new(role: Option<String>, mission_id: Option<String>) -> Self {
        Self { role, mission_id }
    }
}

/// A validated participant identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub role: Role,
    pub mission_id: String,
}

/// Turns a claim into an identity the router can trust.
///
/// Verification (tokens, signed headers) plugs in here without touching
/// routing.
pub trait RoleResolver: Send + Sync {
    fn resolve(&self, claim: &RoleClaim) -> Result<Identity, RelayError>;
}

/// Trusts the asserted role as-is, only checking presence and spelling
#[derive(Debug, Clone, Copy, Default)]
pub struct AssertedRoleResolver;

impl RoleResolver for AssertedRoleResolver {
    fn resolve(&self, claim: &RoleClaim) -> Result<Identity, RelayError> {
        let role = non_empty(claim.role.as_deref());
        let mission_id = non_empty(claim.mission_id.as_deref());

        let (Some(role), Some(mission_id)) = (role, mission_id) else {
            return Err(RelayError::Validation("Missing role or missionId".to_string()));
        };

        let role = role
            .parse::<Role>()
            .map_err(|e| RelayError::Validation(e.to_string()))?;

        Ok(Identity {
            role,
            mission_id: mission_id.to_string(),
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
