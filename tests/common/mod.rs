//! Common utilities for integration tests

pub mod fixtures;
pub mod test_helpers;

// Re-export commonly used items
pub use fixtures::{cosmology, small_cmb_settings, small_matter_settings, task_context};
pub use test_helpers::{assert_strictly_increasing, relative_error};
