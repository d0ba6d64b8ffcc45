//! Item aggregate - domain model and state transitions.
//!
//! This module contains the core domain logic for batch items:
//! - Item types and states (typestate pattern)
//! - State transition methods
//! - The flattened [`BatchItem`] view handed to and returned from a run

pub mod state;
pub mod transitions;

pub use state::*;
