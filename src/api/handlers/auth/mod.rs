//! Auth handlers and supporting modules.
//!
//! Authentication is passwordless: the client requests a six-digit one-time
//! code by email, then exchanges the code for a cookie-backed session. At most
//! one unconsumed code per address is valid at a time, and a code is consumed
//! exactly once even under concurrent verification attempts.

pub(crate) mod otp;
pub(crate) mod principal;
pub(crate) mod session;
mod state;
pub(crate) mod storage;
pub(crate) mod types;
pub(crate) mod utils;

pub use state::{AuthConfig, AuthState};
