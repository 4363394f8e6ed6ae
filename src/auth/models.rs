//! Authentication data models

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Role carried inside a bearer token and on the account record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "admin" => Some(Role::Admin),
            "user" => Some(Role::User),
            _ => None,
        }
    }
}

/// The authenticated identity and role extracted from a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub role: Role,
}

/// Bearer token claims: `{id, role, exp}`
#[derive(Serialize, Deserialize, Debug)]
pub struct Claims {
    pub id: String,
    pub role: Role,
    pub exp: usize,
}

/// User database model
///
/// `password_hash` holds an argon2 hash for registered accounts or a
/// synthetic `oauth:<googleId>` linking value for accounts created by the
/// OAuth callback; it is never serialized into responses.
#[derive(FromRow, Serialize, Debug, Clone)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub role: String,
    pub created_at: Option<String>,
}

impl User {
    /// The stored role, defaulting to `user` for unrecognized values.
    pub fn account_role(&self) -> Role {
        Role::parse(&self.role).unwrap_or(Role::User)
    }
}

/// Registration request body
#[derive(Deserialize)]
pub struct RegisterPayload {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
}

/// Password login request body
#[derive(Deserialize)]
pub struct LoginPayload {
    pub email: String,
    pub password: String,
}
