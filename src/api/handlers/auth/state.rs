//! Auth state and configuration.

use std::sync::Arc;

use crate::api::email::EmailSender;

use super::utils::normalize_email;

const DEFAULT_CODE_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_SESSION_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_url: String,
    super_admin_email: String,
    code_ttl_seconds: i64,
    session_ttl_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_url: String, super_admin_email: &str) -> Self {
        Self {
            frontend_url,
            super_admin_email: normalize_email(super_admin_email),
            code_ttl_seconds: DEFAULT_CODE_TTL_SECONDS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_code_ttl_seconds(mut self, seconds: i64) -> Self {
        self.code_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    pub(crate) fn frontend_url(&self) -> &str {
        &self.frontend_url
    }

    #[must_use]
    pub fn super_admin_email(&self) -> &str {
        &self.super_admin_email
    }

    /// Compare an already-normalized address against the configured
    /// super-admin address.
    pub(crate) fn is_super_admin(&self, email_normalized: &str) -> bool {
        email_normalized == self.super_admin_email
    }

    pub(crate) fn code_ttl_seconds(&self) -> i64 {
        self.code_ttl_seconds
    }

    pub(crate) fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    pub(crate) fn session_cookie_secure(&self) -> bool {
        self.frontend_url.starts_with("https://")
    }
}

pub struct AuthState {
    config: AuthConfig,
    sender: Arc<dyn EmailSender>,
}

impl AuthState {
    pub fn new(config: AuthConfig, sender: Arc<dyn EmailSender>) -> Self {
        Self { config, sender }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(crate) fn sender(&self) -> &dyn EmailSender {
        self.sender.as_ref()
    }
}
