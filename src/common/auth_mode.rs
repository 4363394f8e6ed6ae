// src/common/auth_mode.rs
//! Startup-selected authentication mode.
//!
//! The "bypass authentication in development" behavior is a mode chosen once
//! when the process starts, never a per-request environment lookup.

use std::env;

use crate::auth::models::{Principal, Role};

/// How the gate treats requests that carry no bearer credential.
///
/// `Strict` rejects them with 401. `DevBypass` substitutes a fixed anonymous
/// development principal. A credential that *is* present is always verified,
/// in both modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Strict,
    DevBypass,
}

impl AuthMode {
    /// Resolve the mode from `DEV_MODE`. Only the exact value `true`
    /// (case-insensitive) enables the bypass; absence or any other value
    /// means `Strict`.
    pub fn from_env() -> Self {
        Self::from_flag(env::var("DEV_MODE").ok().as_deref())
    }

    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag {
            Some(v) if v.to_lowercase() == "true" => AuthMode::DevBypass,
            _ => AuthMode::Strict,
        }
    }

    pub fn is_bypass(&self) -> bool {
        matches!(self, AuthMode::DevBypass)
    }

    /// The fixed anonymous principal substituted for a missing credential
    /// under `DevBypass`. Always the same identity, always role `user`.
    pub fn dev_principal() -> Principal {
        Principal {
            id: "dev-user".to_string(),
            role: Role::User,
        }
    }
}

/// CLI override for the auth mode (`--dev` / `--prod`), applied once in main.
pub fn apply_cli_override(mode: AuthMode) -> AuthMode {
    for arg in env::args() {
        match arg.as_str() {
            "--dev" | "--dev-mode" => return AuthMode::DevBypass,
            "--no-dev" | "--prod" | "--production" => return AuthMode::Strict,
            _ => {}
        }
    }
    mode
}

/// Print the auth mode on startup.
pub fn print_auth_mode(mode: &AuthMode) {
    if mode.is_bypass() {
        println!("⚠️  🔓 DEV BYPASS ENABLED 🔓 ⚠️");
        println!("   Requests without a bearer token run as '{}'", AuthMode::dev_principal().id);
        println!("   ⚠️  DO NOT USE IN PRODUCTION ⚠️");
        println!();
    } else {
        println!("🔒 Strict mode - bearer token required on protected routes");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bypass_requires_exact_flag_value() {
        assert_eq!(AuthMode::from_flag(None), AuthMode::Strict);
        assert_eq!(AuthMode::from_flag(Some("")), AuthMode::Strict);
        assert_eq!(AuthMode::from_flag(Some("1")), AuthMode::Strict);
        assert_eq!(AuthMode::from_flag(Some("yes")), AuthMode::Strict);
        assert_eq!(AuthMode::from_flag(Some("false")), AuthMode::Strict);
        assert_eq!(AuthMode::from_flag(Some("true")), AuthMode::DevBypass);
        assert_eq!(AuthMode::from_flag(Some("TRUE")), AuthMode::DevBypass);
    }

    #[test]
    fn test_dev_principal_is_fixed() {
        let a = AuthMode::dev_principal();
        let b = AuthMode::dev_principal();
        assert_eq!(a.id, b.id);
        assert_eq!(a.id, "dev-user");
        assert_eq!(a.role, Role::User);
    }
}
