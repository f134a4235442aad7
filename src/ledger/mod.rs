// src/ledger/mod.rs
//! Public ledger layer: registry client, wallet capability seam, and the
//! in-process double used by tests and local development.

pub mod mock;
pub mod registry;
pub mod wallet;
