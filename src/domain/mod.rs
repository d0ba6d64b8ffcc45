//! Core domain types for the enrichment pipeline.
//!
//! This module contains pure domain types with no I/O:
//! - Item typestate machine and the flattened batch item
//! - Normalized content produced by extraction
//! - Record-store shapes

pub mod content;
pub mod item;
pub mod record;
