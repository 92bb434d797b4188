//! Bearer-token authentication and role-based access.

mod jwt;
mod middleware;

pub use jwt::JwtService;
pub use middleware::{auth_middleware, bearer_token};

use serde::{Deserialize, Serialize};

/// User roles. Mutating endpoints require an operator role; the live event
/// stream additionally excludes ADMIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Owner,
    Ceo,
    Developer,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "OWNER",
            Role::Ceo => "CEO",
            Role::Developer => "DEVELOPER",
            Role::Admin => "ADMIN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "OWNER" => Some(Role::Owner),
            "CEO" => Some(Role::Ceo),
            "DEVELOPER" => Some(Role::Developer),
            "ADMIN" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Roles allowed to mutate bot state, keys, users, and news.
    pub fn can_operate(&self) -> bool {
        matches!(self, Role::Owner | Role::Ceo | Role::Admin)
    }

    /// Roles allowed on the live event stream.
    pub fn can_stream(&self) -> bool {
        matches!(self, Role::Owner | Role::Ceo | Role::Developer)
    }
}

/// JWT claims payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id).
    pub sub: String,
    pub email: String,
    pub role: Role,
    /// Expiration timestamp (seconds).
    pub exp: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trip() {
        for role in [Role::Owner, Role::Ceo, Role::Developer, Role::Admin] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("viewer"), None);
    }

    #[test]
    fn operator_and_stream_matrices() {
        assert!(Role::Owner.can_operate() && Role::Owner.can_stream());
        assert!(Role::Ceo.can_operate() && Role::Ceo.can_stream());
        assert!(!Role::Developer.can_operate() && Role::Developer.can_stream());
        assert!(Role::Admin.can_operate() && !Role::Admin.can_stream());
    }
}
