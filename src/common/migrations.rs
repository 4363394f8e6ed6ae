// src/common/migrations.rs
//! Database schema management

use sqlx::SqlitePool;
use tracing::info;

/// Create all tables and indexes this service owns.
///
/// Tables are created idempotently on startup; the persistence engine itself
/// is an external concern and no data migration framework is carried here.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    create_account_tables(pool).await?;
    create_credential_tables(pool).await?;
    create_indexes(pool).await?;

    info!("✅ Database migration completed successfully!");

    Ok(())
}

/// Local accounts. `email` is unique when present; OAuth-created accounts
/// carry a synthetic linking value in `password_hash` instead of a real hash.
async fn create_account_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT UNIQUE,
            name TEXT,
            password_hash TEXT,
            role TEXT NOT NULL DEFAULT 'user',
            created_at TEXT DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Google credential records, one row per local account (`user_id` is the
/// upsert key). Token columns are independently nullable; `expires_at` is
/// advisory for the access token only.
async fn create_credential_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS google_accounts (
            user_id TEXT PRIMARY KEY,
            google_id TEXT NOT NULL,
            email TEXT,
            name TEXT,
            picture TEXT,
            access_token TEXT,
            refresh_token TEXT,
            expires_at TEXT,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_indexes(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_email ON users(email)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_google_accounts_google_id ON google_accounts(google_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
