//! # Govscope Core
//!
//! Governance data model and aggregation for Govscope - DAO voting analytics.
//!
//! This crate holds the canonical governance entities (proposals, delegates,
//! vote records) and the pure aggregation step that folds raw votes into the
//! delegate-by-proposal voting matrix and its participation summaries.

pub mod error;
pub mod matrix;
pub mod models;

pub use error::*;
pub use matrix::*;
pub use models::*;
