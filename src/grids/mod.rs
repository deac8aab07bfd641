//! Sampling grids shared by every integration task
//!
//! Both grids are built once per run, before any task is scheduled, and are
//! read-only afterwards.

pub mod time;
pub mod wavenumber;

pub use time::TimeSampling;
pub use wavenumber::WavenumberGrid;
