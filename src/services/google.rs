// src/services/google.rs
//! Google OAuth2 provider client: authorization URL construction, code and
//! refresh exchanges, identity-assertion verification, revocation. Pure
//! provider I/O; credential persistence lives in `googleauth::store`.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

const GOOGLE_AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_TOKENINFO_ENDPOINT: &str = "https://oauth2.googleapis.com/tokeninfo";
const GOOGLE_REVOKE_ENDPOINT: &str = "https://oauth2.googleapis.com/revoke";

#[derive(Debug, Error)]
pub enum GoogleError {
    #[error("Google OAuth not configured")]
    NotConfigured,

    #[error("authorization code exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("identity token rejected: {0}")]
    IdTokenInvalid(String),

    /// The provider explicitly refused the stored refresh token. The token
    /// should be treated as invalid going forward.
    #[error("refresh token rejected: {0}")]
    RefreshRejected(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("malformed provider response: {0}")]
    Serialization(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Token endpoint response for both the code and refresh grants.
///
/// `refresh_token` is routinely absent on repeat consents and on refresh
/// responses; `id_token` only accompanies the authorization-code grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

/// Profile fields extracted from a verified identity assertion.
#[derive(Debug, Clone)]
pub struct GoogleIdentity {
    pub google_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GoogleService {
    http: Client,
    client_id: Option<String>,
    client_secret: Option<String>,
    redirect_uri: String,
    pub(crate) auth_endpoint: String,
    pub(crate) token_endpoint: String,
    pub(crate) tokeninfo_endpoint: String,
    pub(crate) revoke_endpoint: String,
}

impl GoogleService {
    pub fn new(
        http: Client,
        client_id: Option<String>,
        client_secret: Option<String>,
        redirect_uri: String,
    ) -> Self {
        Self {
            http,
            client_id,
            client_secret,
            redirect_uri,
            auth_endpoint: GOOGLE_AUTH_ENDPOINT.to_string(),
            token_endpoint: GOOGLE_TOKEN_ENDPOINT.to_string(),
            tokeninfo_endpoint: GOOGLE_TOKENINFO_ENDPOINT.to_string(),
            revoke_endpoint: GOOGLE_REVOKE_ENDPOINT.to_string(),
        }
    }

    fn credentials(&self) -> Result<(&str, &str), GoogleError> {
        match (self.client_id.as_deref(), self.client_secret.as_deref()) {
            (Some(id), Some(secret)) => Ok((id, secret)),
            _ => Err(GoogleError::NotConfigured),
        }
    }

    /// Build the provider authorization URL.
    ///
    /// `offline` access and forced re-consent guarantee a refresh token even
    /// for a previously-authorized user. The caller's intended post-login
    /// destination rides along opaquely in `state`.
    pub fn authorization_url(&self, next: Option<&str>) -> Result<String, GoogleError> {
        let (client_id, _) = self.credentials()?;

        let scopes = [
            "openid",
            "profile",
            "email",
            "https://www.googleapis.com/auth/drive.readonly",
            "https://www.googleapis.com/auth/gmail.readonly",
        ];
        let scope_param = scopes.join(" ");

        let state_param = next
            .filter(|n| !n.is_empty())
            .map(|n| format!("&state={}", urlencoding::encode(n)))
            .unwrap_or_default();

        let auth_url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent{}",
            self.auth_endpoint,
            urlencoding::encode(client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&scope_param),
            state_param
        );

        debug!(scopes = %scope_param, "Generated Google OAuth authorization URL");
        Ok(auth_url)
    }

    /// Exchange a one-time authorization code for tokens.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse, GoogleError> {
        let (client_id, client_secret) = self.credentials()?;

        let params = [
            ("code", code),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];

        debug!("Exchanging authorization code for tokens");

        let response = self
            .http
            .post(&self.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| GoogleError::RequestFailed(e.to_string()))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = %status, error = %error_text, "Token exchange failed");
            return Err(GoogleError::ExchangeFailed(format!(
                "HTTP {}: {}",
                status, error_text
            )));
        }

        let token_response = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| GoogleError::Serialization(e.to_string()))?;

        info!(
            refresh_token_present = token_response.refresh_token.is_some(),
            "Successfully exchanged authorization code for tokens"
        );
        Ok(token_response)
    }

    /// Verify an identity assertion via Google's tokeninfo endpoint and
    /// extract the profile fields. Signature checking happens provider-side;
    /// audience and expiry are enforced here.
    pub async fn verify_id_token(&self, id_token: &str) -> Result<GoogleIdentity, GoogleError> {
        let (client_id, _) = self.credentials()?;

        let tokeninfo_url = format!("{}?id_token={}", self.tokeninfo_endpoint, id_token);

        debug!("Verifying identity assertion with tokeninfo endpoint");

        let response = self
            .http
            .get(&tokeninfo_url)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP error contacting tokeninfo endpoint");
                GoogleError::RequestFailed(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(http_status = %status, "tokeninfo endpoint rejected the identity token");
            return Err(GoogleError::IdTokenInvalid(format!("HTTP {}", status)));
        }

        let body = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| GoogleError::Serialization(e.to_string()))?;

        let sub = body
            .get("sub")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| GoogleError::IdTokenInvalid("missing subject".to_string()))?;

        // tokeninfo serializes numbers as strings; accept either.
        let exp = body.get("exp").and_then(|v| {
            v.as_i64()
                .or_else(|| v.as_str().and_then(|s| s.parse::<i64>().ok()))
        });
        if let Some(exp) = exp {
            let now = chrono::Utc::now().timestamp();
            if exp < now {
                warn!(token_exp = exp, "Identity token has expired");
                return Err(GoogleError::IdTokenInvalid("token has expired".to_string()));
            }
        }

        match body.get("aud").and_then(|v| v.as_str()) {
            Some(aud) if aud == client_id => {
                debug!("Identity token audience validation successful");
            }
            Some(aud) => {
                warn!(
                    token_audience = %aud,
                    "Identity token audience validation failed - rejecting token"
                );
                return Err(GoogleError::IdTokenInvalid("audience mismatch".to_string()));
            }
            None => {
                warn!("Identity token missing audience field - rejecting token");
                return Err(GoogleError::IdTokenInvalid("missing audience".to_string()));
            }
        }

        if let Some(false) = body.get("email_verified").and_then(|v| {
            v.as_bool()
                .or_else(|| v.as_str().map(|s| s == "true"))
        }) {
            warn!("Identity token carries an unverified email address");
        }

        Ok(GoogleIdentity {
            google_id: sub,
            email: body.get("email").and_then(|v| v.as_str()).map(str::to_string),
            name: body.get("name").and_then(|v| v.as_str()).map(str::to_string),
            picture: body
                .get("picture")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        })
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<TokenResponse, GoogleError> {
        let (client_id, client_secret) = self.credentials()?;

        let params = [
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        debug!("Refreshing access token with Google OAuth");

        let response = self
            .http
            .post(&self.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to send token refresh request");
                GoogleError::RequestFailed(e.to_string())
            })?;

        let status = response.status();
        debug!(status = %status, "Received token refresh response");

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = %status, error = %error_text, "Token refresh failed");
            // A 4xx means the provider looked at the refresh token and said
            // no; anything else is the provider's problem, not the token's.
            if status.is_client_error() {
                return Err(GoogleError::RefreshRejected(format!(
                    "HTTP {}: {}",
                    status, error_text
                )));
            }
            return Err(GoogleError::ExchangeFailed(format!(
                "HTTP {}: {}",
                status, error_text
            )));
        }

        let token_response = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| GoogleError::Serialization(e.to_string()))?;

        info!("Successfully refreshed access token");
        Ok(token_response)
    }

    /// Revoke a token with the provider. Callers treat failures as advisory.
    pub async fn revoke_token(&self, token: &str) -> Result<(), GoogleError> {
        let params = [("token", token)];

        let response = self
            .http
            .post(&self.revoke_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| GoogleError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GoogleError::RequestFailed(format!(
                "revocation returned HTTP {}",
                status
            )));
        }

        debug!("Token revoked with provider");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> GoogleService {
        GoogleService::new(
            Client::new(),
            Some("test_client_id".to_string()),
            Some("test_secret".to_string()),
            "http://localhost:8080/api/auth/google/callback".to_string(),
        )
    }

    #[test]
    fn test_authorization_url_shape() {
        let auth_url = service().authorization_url(None).unwrap();

        assert!(auth_url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(auth_url.contains("client_id=test_client_id"));
        assert!(auth_url.contains("redirect_uri=http"));
        assert!(auth_url.contains("access_type=offline"));
        assert!(auth_url.contains("prompt=consent"));
        assert!(auth_url.contains("gmail.readonly"));
        assert!(auth_url.contains("drive.readonly"));
        assert!(!auth_url.contains("&state="));
    }

    #[test]
    fn test_authorization_url_round_trips_next_via_state() {
        let auth_url = service().authorization_url(Some("/orders?tab=open")).unwrap();
        assert!(auth_url.contains("&state=%2Forders%3Ftab%3Dopen"));
    }

    #[test]
    fn test_authorization_url_requires_configuration() {
        let svc = GoogleService::new(Client::new(), None, None, String::new());
        assert!(matches!(
            svc.authorization_url(None),
            Err(GoogleError::NotConfigured)
        ));
    }
}
