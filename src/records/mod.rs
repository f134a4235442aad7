// src/records/mod.rs
//! Credential record persistence.

pub mod store;
