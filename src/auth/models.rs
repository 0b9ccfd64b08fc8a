//! Authentication Models
//! Mission: Define credential and token data structures

use serde::{Deserialize, Serialize};

/// A stored credential. The bcrypt hash persists to the sealed credentials
/// file but is never serialized to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: String,
}

/// Roles for access control.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "user")]
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

/// JWT claims payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub iat: usize,
    pub exp: usize,
}

/// Register / login request body. Fields default to empty so missing input
/// is reported as `invalid` by validation rather than a body rejection.
#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Sanitized view of a credential for API responses.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub username: String,
    pub role: Role,
    pub created_at: String,
}

impl UserSummary {
    pub fn from_credential(credential: &Credential) -> Self {
        Self {
            username: credential.username.clone(),
            role: credential.role,
            created_at: credential.created_at.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), r#""admin""#);
        let role: Role = serde_json::from_str(r#""user""#).unwrap();
        assert_eq!(role, Role::User);
    }

    #[test]
    fn test_summary_has_no_hash() {
        let credential = Credential {
            username: "alice".to_string(),
            password_hash: "$2b$12$secret".to_string(),
            role: Role::User,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        };
        let summary = UserSummary::from_credential(&credential);
        let json = serde_json::to_string(&summary).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("alice"));
    }
}
