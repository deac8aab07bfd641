//! Run configuration
//!
//! - [`Settings`]: which modes, initial conditions, gauge and outputs to compute
//! - [`Precision`]: every numerical knob (triggers, truncations, sampling, tolerances)
//!
//! Both are validated before any grid is built, so configuration errors never
//! surface from inside a worker thread.

pub mod precision;
pub mod settings;

pub use precision::Precision;
pub use settings::{Gauge, NcdmFluidMethod, RsaMethod, Settings, TcaMethod, UfaMethod};
