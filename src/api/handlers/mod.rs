//! API handlers for Portico.

pub mod auth;
pub mod health;
pub mod users;
