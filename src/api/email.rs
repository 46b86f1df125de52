//! Email delivery abstraction for one-time codes.
//!
//! The auth handlers only depend on the [`EmailSender`] trait; the concrete
//! sender decides how to deliver (SMTP, provider API, etc.). A send failure
//! never rolls back the issued code: the caller surfaces it as a delivery
//! problem distinct from verification failures.
//!
//! The default sender for local dev is [`LogEmailSender`], which logs the
//! code instead of sending real email and always reports success.

use anyhow::Result;
use tracing::{debug, info};

/// Email delivery abstraction used by the code-request handler.
pub trait EmailSender: Send + Sync {
    /// Deliver a login code to `to_email` or return an error to mark the
    /// dispatch as failed.
    fn send_code(&self, to_email: &str, code: &str) -> Result<()>;
}

/// Local dev sender that logs the code instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send_code(&self, to_email: &str, code: &str) -> Result<()> {
        info!(
            to_email = %to_email,
            code = %code,
            subject = CODE_EMAIL_SUBJECT,
            "login code email send stub"
        );
        debug!(body = %code_email_body(code), "login code email body");
        Ok(())
    }
}

pub const CODE_EMAIL_SUBJECT: &str = "Your Login Code";

/// Plain-text body for the login code email.
#[must_use]
pub fn code_email_body(code: &str) -> String {
    format!(
        "Use the following code to log in to your account: {code}\n\n\
         This code expires in 10 minutes. If you didn't request this code, \
         you can safely ignore this email.\n"
    )
}
