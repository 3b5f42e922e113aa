//! # mediwel-rules
//!
//! Deterministic, explainable evaluation of policy eligibility predicates
//! against canonical profiles.  The verdicts here gate retrieval and decide
//! which clarification questions are worth asking; nothing in this crate
//! touches I/O.

pub mod engine;

pub use engine::{evaluate, undetermined_fields, Evaluation};
