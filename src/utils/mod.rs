// src/utils/mod.rs
//! Helper functions: content hashing and retry plumbing.

pub mod fingerprint;
pub mod retry;
