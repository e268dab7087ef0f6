//! Expense Query Pipeline
//!
//! Answers natural-language questions about a personal expense dataset with
//! small local language models, without letting a model compute anything:
//! - A router model picks one analysis tool
//! - A specialist model writes one call to that tool
//! - Arguments are validated and corrected against the dataset
//! - Deterministic analysis runs remotely or in an embedded interpreter
//! - An optional summarizer phrases the result, guarded against changed numbers
//!
//! PIPELINE:
//! PRE-FLIGHT → ROUTE → SPECIALIZE → VALIDATE → EXECUTE → SUMMARIZE → DONE

pub mod agent;
pub mod agents;
pub mod analysis;
pub mod api;
pub mod config;
pub mod error;
pub mod execution;
pub mod invocation;
pub mod models;
pub mod provider;
pub mod state;
pub mod tools;
pub mod validation;

pub use error::{PipelineError, Result};

// Re-export common types
pub use models::*;
