//! License Server Library
//!
//! Exposes the auth core, license consumer, and router for the binary and tests.

pub mod app;
pub mod auth;
pub mod config;
pub mod licenses;
pub mod middleware;

pub use app::{build_router, AppState};
pub use config::Config;
