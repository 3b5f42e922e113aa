//! # mediwel-contracts
//!
//! Shared types and contracts for the mediwel eligibility engine.
//!
//! All crates in the workspace import from here.  No business logic lives in
//! this crate — only data definitions and error types.

pub mod conversation;
pub mod error;
pub mod policy;
pub mod profile;
pub mod retrieval;
