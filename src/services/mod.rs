// src/services/mod.rs
//! Business logic and API layer.

pub mod api_server;
pub mod issuer;
pub mod state;
pub mod verifier;
