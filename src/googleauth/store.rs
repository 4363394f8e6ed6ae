//! Credential persistence: lookups, the merge function, and the
//! upsert-by-`user_id` write that is the unit of atomicity.

use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use super::models::GoogleAccount;
use crate::auth::models::User;
use crate::common::generate_user_id;
use crate::services::google::GoogleIdentity;

/// Fields produced by a fresh provider exchange.
///
/// Absent fields must not clobber what is already stored; [`merge`] owns
/// that precedence.
#[derive(Debug, Clone, Default)]
pub struct CredentialUpdate {
    pub google_id: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<String>,
}

/// Reconcile a fresh exchange with the stored record.
///
/// Field by field: an incoming value wins, an absent incoming value keeps
/// the stored one. In particular a repeat consent that omits `refresh_token`
/// preserves the previously stored refresh token rather than nulling it.
pub fn merge(
    user_id: &str,
    existing: Option<&GoogleAccount>,
    incoming: &CredentialUpdate,
) -> GoogleAccount {
    fn pick(incoming: &Option<String>, current: Option<&String>) -> Option<String> {
        incoming.clone().or_else(|| current.cloned())
    }

    GoogleAccount {
        user_id: user_id.to_string(),
        google_id: incoming
            .google_id
            .clone()
            .or_else(|| existing.map(|a| a.google_id.clone()))
            .unwrap_or_default(),
        email: pick(&incoming.email, existing.and_then(|a| a.email.as_ref())),
        name: pick(&incoming.name, existing.and_then(|a| a.name.as_ref())),
        picture: pick(&incoming.picture, existing.and_then(|a| a.picture.as_ref())),
        access_token: pick(
            &incoming.access_token,
            existing.and_then(|a| a.access_token.as_ref()),
        ),
        refresh_token: pick(
            &incoming.refresh_token,
            existing.and_then(|a| a.refresh_token.as_ref()),
        ),
        expires_at: pick(
            &incoming.expires_at,
            existing.and_then(|a| a.expires_at.as_ref()),
        ),
        created_at: existing.and_then(|a| a.created_at.clone()),
        updated_at: existing.and_then(|a| a.updated_at.clone()),
    }
}

pub async fn find_by_user_id<'e, E>(
    executor: E,
    user_id: &str,
) -> Result<Option<GoogleAccount>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, GoogleAccount>("SELECT * FROM google_accounts WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(executor)
        .await
}

/// Write a merged record, keyed by `user_id`.
pub async fn upsert<'e, E>(executor: E, account: &GoogleAccount) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO google_accounts
            (user_id, google_id, email, name, picture, access_token, refresh_token, expires_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(user_id) DO UPDATE SET
            google_id = excluded.google_id,
            email = excluded.email,
            name = excluded.name,
            picture = excluded.picture,
            access_token = excluded.access_token,
            refresh_token = excluded.refresh_token,
            expires_at = excluded.expires_at,
            updated_at = datetime('now')
        "#,
    )
    .bind(&account.user_id)
    .bind(&account.google_id)
    .bind(account.email.as_deref())
    .bind(account.name.as_deref())
    .bind(account.picture.as_deref())
    .bind(account.access_token.as_deref())
    .bind(account.refresh_token.as_deref())
    .bind(account.expires_at.as_deref())
    .execute(executor)
    .await?;

    Ok(())
}

/// Null out all token material, keeping the profile fields. Trivially
/// succeeds when no row exists.
pub async fn clear_tokens(pool: &SqlitePool, user_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE google_accounts
        SET access_token = NULL, refresh_token = NULL, expires_at = NULL,
            updated_at = datetime('now')
        WHERE user_id = ?
        "#,
    )
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Drop only the refresh token, after the provider has rejected it.
pub async fn clear_refresh_token(pool: &SqlitePool, user_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE google_accounts SET refresh_token = NULL, updated_at = datetime('now') WHERE user_id = ?",
    )
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn find_account_by_email(
    conn: &mut SqliteConnection,
    email: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(conn)
        .await
}

/// Create a local account for a first-time Google sign-in.
///
/// There is no password to store, so `password_hash` gets a synthetic
/// linking value derived from the provider subject; it can never verify as
/// a password.
pub async fn create_oauth_account(
    conn: &mut SqliteConnection,
    identity: &GoogleIdentity,
) -> Result<User, sqlx::Error> {
    let id = generate_user_id();
    let linking_value = format!("oauth:{}", identity.google_id);

    sqlx::query(
        "INSERT INTO users (id, email, name, password_hash, role) VALUES (?, ?, ?, ?, 'user')",
    )
    .bind(&id)
    .bind(identity.email.as_deref())
    .bind(identity.name.as_deref())
    .bind(&linking_value)
    .execute(conn)
    .await?;

    debug!(user_id = %id, "Created local account for first Google sign-in");

    Ok(User {
        id,
        email: identity.email.clone(),
        name: identity.name.clone(),
        password_hash: Some(linking_value),
        role: "user".to_string(),
        created_at: None,
    })
}
