//! Core data models for the dataset gateway.
//!
//! Objects come back from whichever object store backs the bucket; users and
//! uploads live in the user store. All of them serialize as JSON via `serde`.

pub mod entry;
pub mod object;
pub mod user;
