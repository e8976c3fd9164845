//! Testing utilities for stepflow pipelines.
//!
//! This module provides:
//! - Scripted dispatchers that answer without running processes
//! - Assertions over pipeline results

mod assertions;
mod mocks;

pub use assertions::{assert_absent, assert_skipped_because, assert_states};
pub use mocks::{DispatchRecord, ScriptedDispatcher, ScriptedResponse};
