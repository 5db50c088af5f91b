//! License key management, gated by the auth layer.

pub mod api;
pub mod models;
pub mod store;

pub use api::LicenseError;
pub use models::{License, LicenseStatus};
pub use store::{LicenseStore, SqliteLicenseStore};
