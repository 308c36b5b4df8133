//! CareBloom client library.
//!
//! Auth and notification services over a Supabase-compatible backend.
//! Re-exports modules needed by the binary and integration tests in `tests/`.

pub mod auth;
pub mod backend;
pub mod config;
pub mod errors;
pub mod models;
pub mod navigation;
pub mod notification;
pub mod supabase;
