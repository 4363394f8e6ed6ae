// src/common/config.rs
//! Process configuration, resolved from the environment exactly once at
//! startup and carried inside `AppState`. Components never read env vars
//! at call sites.

use std::env;

use super::auth_mode::AuthMode;

/// Runtime configuration for the service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    /// Signing secret for app bearer tokens. `None` means the deployment is
    /// misconfigured; token operations fail with a 500, never a 401.
    pub jwt_secret: Option<String>,
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<String>,
    pub google_redirect_uri: String,
    /// Base URL of the web frontend, target of the post-OAuth redirect.
    pub web_base_url: String,
    pub cors_origins: String,
}

impl AppConfig {
    /// Read configuration from the environment.
    ///
    /// The auth mode is consulted for one thing only: under `DevBypass` a
    /// missing `JWT_SECRET` falls back to a fixed development secret so the
    /// local loop works out of the box. Under `Strict` the secret stays
    /// absent and surfaces as a misconfiguration on first use.
    pub fn from_env(auth_mode: &AuthMode) -> Self {
        let jwt_secret = env::var("JWT_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .or_else(|| {
                if auth_mode.is_bypass() {
                    Some("dev_jwt_secret".to_string())
                } else {
                    None
                }
            });

        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://identity_api.db".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse::<u16>().ok())
                .unwrap_or(8080),
            jwt_secret,
            google_client_id: env::var("GOOGLE_CLIENT_ID").ok().filter(|s| !s.is_empty()),
            google_client_secret: env::var("GOOGLE_CLIENT_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            google_redirect_uri: env::var("GOOGLE_REDIRECT_URI").unwrap_or_else(|_| {
                "http://localhost:8080/api/auth/google/callback".to_string()
            }),
            web_base_url: env::var("WEB_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            cors_origins: env::var("CORS_ORIGINS").unwrap_or_else(|_| {
                "http://localhost:3000,http://localhost:3001,http://localhost:5173".to_string()
            }),
        }
    }
}
