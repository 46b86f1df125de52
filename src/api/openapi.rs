//! OpenAPI document served under `/docs`.

use utoipa::OpenApi;

use super::handlers::{auth, health, users};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "portico",
        description = "Passwordless authentication and account management API"
    ),
    paths(
        health::health,
        auth::otp::request_code,
        auth::otp::verify_code,
        auth::session::session,
        auth::session::logout,
        users::list_users,
        users::set_user_role,
        users::delete_user,
        users::update_me,
    ),
    components(schemas(
        health::Health,
        auth::types::Role,
        auth::types::RequestCodeRequest,
        auth::types::RequestCodeResponse,
        auth::types::VerifyCodeRequest,
        auth::types::VerifyCodeResponse,
        auth::types::VerifyErrorResponse,
        auth::types::UserResponse,
        auth::types::SessionResponse,
        users::UserRoleRequest,
        users::ProfileUpdateRequest,
    )),
    tags(
        (name = "auth", description = "One-time codes and sessions"),
        (name = "users", description = "Account management"),
        (name = "health", description = "Service health")
    )
)]
pub struct ApiDoc;
