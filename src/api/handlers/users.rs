//! Account management endpoints.
//!
//! Flow overview:
//! 1) Authenticate the request via session cookie.
//! 2) Admin-only routes list accounts, change roles, and delete accounts.
//! 3) `/v1/me` lets any authenticated account edit its own profile fields.

use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;
use uuid::Uuid;

use super::auth::principal::{require_admin, require_auth};
use super::auth::storage::{self, DeleteOutcome, RoleChange};
use super::auth::types::{Role, UserResponse};
use super::auth::utils::normalize_optional;
use super::auth::AuthState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UserRoleRequest {
    pub role: Role,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ProfileUpdateRequest {
    pub name: Option<String>,
    pub mobile: Option<String>,
}

#[utoipa::path(
    get,
    path = "/v1/users",
    responses(
        (status = 200, description = "List accounts, admins first.", body = [UserResponse]),
        (status = 401, description = "Missing or invalid session cookie."),
        (status = 403, description = "Forbidden."),
    ),
    tag = "users"
)]
pub async fn list_users(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    if let Err(status) = require_admin(&headers, &pool, &auth_state).await {
        return status.into_response();
    }

    match storage::list_accounts(&pool).await {
        Ok(accounts) => {
            let list: Vec<UserResponse> = accounts.into_iter().map(UserResponse::from).collect();
            (StatusCode::OK, Json(list)).into_response()
        }
        Err(err) => {
            error!("Failed to list accounts: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    put,
    path = "/v1/users/{id}/role",
    request_body = UserRoleRequest,
    params(
        ("id" = String, Path, description = "Account id")
    ),
    responses(
        (status = 200, description = "Role updated.", body = UserResponse),
        (status = 400, description = "Invalid account id or role."),
        (status = 401, description = "Missing or invalid session cookie."),
        (status = 403, description = "Forbidden or protected account."),
        (status = 404, description = "Account not found."),
    ),
    tag = "users"
)]
pub async fn set_user_role(
    Path(id): Path<String>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<UserRoleRequest>>,
) -> impl IntoResponse {
    if let Err(status) = require_admin(&headers, &pool, &auth_state).await {
        return status.into_response();
    }

    let Ok(account_id) = Uuid::parse_str(id.trim()) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let Some(Json(request)) = payload else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    match storage::set_role(&pool, account_id, request.role).await {
        Ok(RoleChange::Updated(account)) => {
            (StatusCode::OK, Json(UserResponse::from(account))).into_response()
        }
        Ok(RoleChange::Forbidden) => StatusCode::FORBIDDEN.into_response(),
        Ok(RoleChange::NotFound) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!("Failed to update role for {account_id}: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    delete,
    path = "/v1/users/{id}",
    params(
        ("id" = String, Path, description = "Account id")
    ),
    responses(
        (status = 204, description = "Account deleted."),
        (status = 400, description = "Invalid account id."),
        (status = 401, description = "Missing or invalid session cookie."),
        (status = 403, description = "Forbidden or protected account."),
        (status = 404, description = "Account not found."),
    ),
    tag = "users"
)]
pub async fn delete_user(
    Path(id): Path<String>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    if let Err(status) = require_admin(&headers, &pool, &auth_state).await {
        return status.into_response();
    }

    let Ok(account_id) = Uuid::parse_str(id.trim()) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    match storage::delete_account(&pool, account_id).await {
        Ok(DeleteOutcome::Deleted) => StatusCode::NO_CONTENT.into_response(),
        Ok(DeleteOutcome::Forbidden) => StatusCode::FORBIDDEN.into_response(),
        Ok(DeleteOutcome::NotFound) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!("Failed to delete account {account_id}: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    patch,
    path = "/v1/me",
    request_body = ProfileUpdateRequest,
    responses(
        (status = 200, description = "Profile updated.", body = UserResponse),
        (status = 400, description = "Missing payload."),
        (status = 401, description = "Missing or invalid session cookie."),
    ),
    tag = "users"
)]
pub async fn update_me(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ProfileUpdateRequest>>,
) -> impl IntoResponse {
    let account = match require_auth(&headers, &pool, &auth_state).await {
        Ok(account) => account,
        Err(status) => return status.into_response(),
    };

    let Some(Json(request)) = payload else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let name = normalize_optional(request.name);
    let mobile = normalize_optional(request.mobile);

    match storage::update_profile(&pool, account.id, name.as_deref(), mobile.as_deref()).await {
        Ok(Some(updated)) => (StatusCode::OK, Json(UserResponse::from(updated))).into_response(),
        // The account vanished between session lookup and update.
        Ok(None) => StatusCode::UNAUTHORIZED.into_response(),
        Err(err) => {
            error!("Failed to update profile for {}: {err}", account.id);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
