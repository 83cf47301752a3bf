//! Document tracking service: uploads with expiry metadata, per-owner
//! visibility and expiry analytics over a JSON-file backed store.

pub mod analytics;
pub mod auth;
pub mod config;
pub mod documents_api;
pub mod error;
pub mod models;
mod persistence;
pub mod routes;
pub mod storage;
pub mod upload;
pub mod user_models;
pub mod user_storage;
pub mod validation;

pub use config::Config;
pub use routes::{create_router, AppState};
