// src/storage/mod.rs
//! Permanent storage layer: gateway client and in-process double.

pub mod gateway;
pub mod memory;
