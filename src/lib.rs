//! # Portico
//!
//! `portico` is the API for a small studio portfolio site. It provides
//! passwordless authentication: a visitor requests a one-time code by email,
//! verifies it (supplying a display name on first login), and receives a
//! cookie-backed server-side session.
//!
//! ## Accounts & Roles
//!
//! - Roles form a closed set: `admin` and `client`.
//! - Addresses are normalized (trimmed, lowercased) and globally unique.
//! - A single protected super-admin account is reconciled at startup from the
//!   configured address; its role cannot be changed and it cannot be deleted.
//!
//! ## One-time codes
//!
//! Codes are 6 decimal digits valid for 10 minutes. Issuing a new code marks
//! every previous unconsumed code for that address as used, so at most one
//! code per address is valid at any instant. Consumption is an atomic
//! conditional update; a code can be redeemed exactly once.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
