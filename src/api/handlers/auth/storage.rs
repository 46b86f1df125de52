//! Database helpers for codes, accounts, and sessions.
//!
//! All coordination invariants live here as conditional writes against
//! Postgres: issuing a code invalidates prior unconsumed codes in the same
//! transaction, and consumption is a single conditional `UPDATE` so only one
//! concurrent verifier can win.

use anyhow::{anyhow, Context, Result};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{info, Instrument};
use uuid::Uuid;

use super::state::AuthConfig;
use super::types::Role;
use super::utils::{generate_session_token, hash_session_token, is_unique_violation};

#[derive(Clone, Debug)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub mobile: Option<String>,
    pub role: Role,
    pub is_protected: bool,
}

/// Outcome of a verification attempt.
#[derive(Debug)]
pub(crate) enum VerifyOutcome {
    /// Code consumed; account created or fetched.
    Success(Account),
    /// Valid code for a brand-new address but no display name was supplied.
    /// The code stays unconsumed so it can be resubmitted with a name.
    RegistrationRequired,
    /// No unconsumed, unexpired code matches the address/code pair.
    InvalidOrExpired,
}

/// Outcome of an admin role change.
#[derive(Debug)]
pub(crate) enum RoleChange {
    Updated(Account),
    Forbidden,
    NotFound,
}

/// Outcome of an admin account deletion.
#[derive(Debug)]
pub(crate) enum DeleteOutcome {
    Deleted,
    Forbidden,
    NotFound,
}

/// Minimal data returned for a valid session cookie. The role is read fresh
/// from the account row on every lookup, so role changes apply immediately.
pub(crate) struct SessionRecord {
    pub(crate) account: Account,
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    let role: String = row.get("role");
    let role = Role::parse(&role).ok_or_else(|| anyhow!("unknown role in users row: {role}"))?;
    Ok(Account {
        id: row.get("id"),
        email: row.get("email"),
        name: row.get("name"),
        mobile: row.get("mobile"),
        role,
        is_protected: row.get("is_protected"),
    })
}

/// Look up an account by normalized address.
pub(crate) async fn account_by_email(pool: &PgPool, email: &str) -> Result<Option<Account>> {
    let query = "SELECT id, email, name, mobile, role, is_protected FROM users WHERE email = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup account by email")?;

    row.as_ref().map(account_from_row).transpose()
}

/// Issue a new one-time code for an address.
///
/// Invalidation of prior unconsumed codes and the insert of the new row run
/// in one transaction, upholding the at-most-one-valid-code invariant under
/// concurrent requests.
pub(crate) async fn issue_code(
    pool: &PgPool,
    email: &str,
    code: &str,
    ttl_seconds: i64,
) -> Result<()> {
    let mut tx = pool.begin().await.context("begin issue-code transaction")?;

    let query = "UPDATE otp_tokens SET used = TRUE WHERE email = $1 AND used = FALSE";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(email)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to invalidate previous codes")?;

    let query = r"
        INSERT INTO otp_tokens (email, code, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(email)
        .bind(code)
        .bind(ttl_seconds)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to insert one-time code")?;

    tx.commit().await.context("commit issue-code transaction")?;

    Ok(())
}

/// Verify an address/code pair and create-or-fetch the account.
///
/// The only path that consumes the code is one that ends with an account:
/// a valid code for an unknown address without a name returns
/// [`VerifyOutcome::RegistrationRequired`] and leaves the code untouched.
pub(crate) async fn verify_code(
    pool: &PgPool,
    config: &AuthConfig,
    email: &str,
    code: &str,
    name: Option<&str>,
    mobile: Option<&str>,
) -> Result<VerifyOutcome> {
    let mut tx = pool.begin().await.context("begin verify transaction")?;

    let query = r"
        SELECT id FROM otp_tokens
        WHERE email = $1
          AND code = $2
          AND used = FALSE
          AND expires_at > NOW()
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .bind(code)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to lookup one-time code")?;

    let Some(row) = row else {
        let _ = tx.rollback().await;
        return Ok(VerifyOutcome::InvalidOrExpired);
    };
    let token_id: Uuid = row.get("id");

    let query = "SELECT id, email, name, mobile, role, is_protected FROM users WHERE email = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let account_row = sqlx::query(query)
        .bind(email)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to lookup account during verify")?;
    let account = account_row.as_ref().map(account_from_row).transpose()?;

    if account.is_none() && name.is_none() {
        let _ = tx.rollback().await;
        return Ok(VerifyOutcome::RegistrationRequired);
    }

    // Single point of truth under concurrency: of two racing verifiers only
    // one observes used = FALSE here; the other gets zero rows.
    let query = r"
        UPDATE otp_tokens
        SET used = TRUE
        WHERE id = $1
          AND used = FALSE
          AND expires_at > NOW()
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let consumed = sqlx::query(query)
        .bind(token_id)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to consume one-time code")?;

    if consumed.is_none() {
        let _ = tx.rollback().await;
        return Ok(VerifyOutcome::InvalidOrExpired);
    }

    let account = match account {
        Some(account) => account,
        None => {
            let Some(name) = name else {
                // Guarded above; kept total so the match stays exhaustive.
                let _ = tx.rollback().await;
                return Ok(VerifyOutcome::RegistrationRequired);
            };
            create_account_in_tx(&mut tx, config, email, name, mobile).await?
        }
    };

    tx.commit().await.context("commit verify transaction")?;

    Ok(VerifyOutcome::Success(account))
}

async fn create_account_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    config: &AuthConfig,
    email: &str,
    name: &str,
    mobile: Option<&str>,
) -> Result<Account> {
    // The super-admin address is the only path that sets the protected flag
    // here; everything else starts as an unprotected client.
    let (role, is_protected) = if config.is_super_admin(email) {
        (Role::Admin, true)
    } else {
        (Role::Client, false)
    };

    let query = r"
        INSERT INTO users (email, name, mobile, role, is_protected)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, email, name, mobile, role, is_protected
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .bind(name)
        .bind(mobile)
        .bind(role.as_str())
        .bind(is_protected)
        .fetch_one(&mut **tx)
        .instrument(span)
        .await
        .context("failed to create account")?;

    account_from_row(&row)
}

/// Ensure the configured super-admin account exists, idempotently.
pub(crate) async fn seed_super_admin(pool: &PgPool, config: &AuthConfig) -> Result<()> {
    let query = r"
        INSERT INTO users (email, name, role, is_protected)
        VALUES ($1, 'Super Admin', 'admin', TRUE)
        ON CONFLICT (email) DO NOTHING
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(config.super_admin_email())
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to seed super-admin account")?;

    if result.rows_affected() > 0 {
        info!(email = %config.super_admin_email(), "seeded super-admin account");
    }

    Ok(())
}

pub(crate) async fn insert_session(
    pool: &PgPool,
    user_id: Uuid,
    ttl_seconds: i64,
) -> Result<String> {
    // Generate a random token, store only its hash, and return the raw value
    // so the caller can set the session cookie.
    let query = r"
        INSERT INTO sessions (user_id, token_hash, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let token = generate_session_token()?;
        let token_hash = hash_session_token(&token);
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(token_hash)
            .bind(ttl_seconds)
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(token),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert session"),
        }
    }

    Err(anyhow!("failed to generate unique session token"))
}

/// Resolve a session token hash to its account.
///
/// A hit refreshes the rolling expiry window; a miss removes whatever row
/// the hash still points at (expired session or deleted account) so the
/// reference is dead on the server side too.
pub(crate) async fn lookup_session(
    pool: &PgPool,
    token_hash: &[u8],
    ttl_seconds: i64,
) -> Result<Option<SessionRecord>> {
    let query = r"
        SELECT users.id, users.email, users.name, users.mobile, users.role, users.is_protected
        FROM sessions
        JOIN users ON users.id = sessions.user_id
        WHERE sessions.token_hash = $1
          AND sessions.expires_at > NOW()
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup session")?;

    let Some(row) = row else {
        delete_session(pool, token_hash).await?;
        return Ok(None);
    };

    let query = r"
        UPDATE sessions
        SET last_seen_at = NOW(),
            expires_at = NOW() + ($2 * INTERVAL '1 second')
        WHERE token_hash = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .bind(ttl_seconds)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to refresh session expiry")?;

    Ok(Some(SessionRecord {
        account: account_from_row(&row)?,
    }))
}

pub(crate) async fn delete_session(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    // Logout is idempotent; it's fine if no rows are deleted.
    let query = "DELETE FROM sessions WHERE token_hash = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete session")?;
    Ok(())
}

/// List every account, admins first, newest first within a role.
pub(crate) async fn list_accounts(pool: &PgPool) -> Result<Vec<Account>> {
    let query = r"
        SELECT id, email, name, mobile, role, is_protected
        FROM users
        ORDER BY role, created_at DESC
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list accounts")?;

    rows.iter().map(account_from_row).collect()
}

/// Change an account's role. The protected account's role is immutable:
/// asking for a different role yields [`RoleChange::Forbidden`].
pub(crate) async fn set_role(pool: &PgPool, account_id: Uuid, role: Role) -> Result<RoleChange> {
    let mut tx = pool.begin().await.context("begin set-role transaction")?;

    let query = "SELECT role, is_protected FROM users WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(account_id)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to lookup account for role change")?;

    let Some(row) = row else {
        let _ = tx.rollback().await;
        return Ok(RoleChange::NotFound);
    };

    let current: String = row.get("role");
    let is_protected: bool = row.get("is_protected");
    if is_protected && current != role.as_str() {
        let _ = tx.rollback().await;
        return Ok(RoleChange::Forbidden);
    }

    let query = r"
        UPDATE users
        SET role = $2
        WHERE id = $1
        RETURNING id, email, name, mobile, role, is_protected
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(account_id)
        .bind(role.as_str())
        .fetch_one(&mut *tx)
        .instrument(span)
        .await
        .context("failed to update account role")?;

    let account = account_from_row(&row)?;
    tx.commit().await.context("commit set-role transaction")?;

    Ok(RoleChange::Updated(account))
}

/// Delete an account. Protected accounts are undeletable through this path.
pub(crate) async fn delete_account(pool: &PgPool, account_id: Uuid) -> Result<DeleteOutcome> {
    let query = "SELECT is_protected FROM users WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(account_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup account for deletion")?;

    let Some(row) = row else {
        return Ok(DeleteOutcome::NotFound);
    };
    if row.get::<bool, _>("is_protected") {
        return Ok(DeleteOutcome::Forbidden);
    }

    // Guard repeated in the statement so a concurrent protect flip cannot
    // slip a protected row through.
    let query = "DELETE FROM users WHERE id = $1 AND is_protected = FALSE";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(account_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete account")?;

    if result.rows_affected() > 0 {
        Ok(DeleteOutcome::Deleted)
    } else {
        Ok(DeleteOutcome::Forbidden)
    }
}

/// Update an account's own profile fields; absent fields are left unchanged.
pub(crate) async fn update_profile(
    pool: &PgPool,
    account_id: Uuid,
    name: Option<&str>,
    mobile: Option<&str>,
) -> Result<Option<Account>> {
    let query = r"
        UPDATE users
        SET name = COALESCE($2, name),
            mobile = COALESCE($3, mobile)
        WHERE id = $1
        RETURNING id, email, name, mobile, role, is_protected
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(account_id)
        .bind(name)
        .bind(mobile)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to update profile")?;

    row.as_ref().map(account_from_row).transpose()
}
