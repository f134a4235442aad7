// src/models/mod.rs
//! Data structures shared across the issuance and verification services.

pub mod credential;
