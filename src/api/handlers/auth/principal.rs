//! Request guards that turn a session cookie into an authenticated account.

use axum::http::{HeaderMap, StatusCode};
use sqlx::PgPool;

use super::session::authenticate_session;
use super::state::AuthState;
use super::storage::Account;
use super::types::Role;

/// Require a valid session; answers 401 otherwise.
pub(crate) async fn require_auth(
    headers: &HeaderMap,
    pool: &PgPool,
    auth_state: &AuthState,
) -> Result<Account, StatusCode> {
    match authenticate_session(headers, pool, auth_state).await? {
        Some(record) => Ok(record.account),
        None => Err(StatusCode::UNAUTHORIZED),
    }
}

/// Require a valid session belonging to an admin; answers 403 for clients.
///
/// The role comes from the account row joined during session lookup, so a
/// demotion takes effect on the very next request.
pub(crate) async fn require_admin(
    headers: &HeaderMap,
    pool: &PgPool,
    auth_state: &AuthState,
) -> Result<Account, StatusCode> {
    let account = require_auth(headers, pool, auth_state).await?;
    match account.role {
        Role::Admin => Ok(account),
        Role::Client => Err(StatusCode::FORBIDDEN),
    }
}
