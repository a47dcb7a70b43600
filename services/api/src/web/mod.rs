//! services/api/src/web/mod.rs
//!
//! The web layer: shared state and the REST handlers.

pub mod rest;
pub mod state;

pub use rest::ApiDoc;
pub use state::AppState;
