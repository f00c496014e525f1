//! Window aggregation and window-level validation.
//!
//! This module groups fine samples into minute and 15-minute windows behind a
//! sufficiency gate, evaluates the statistical rule groups on each 15-minute
//! window, and assembles the final rows for export.

pub mod aggregate;
pub mod report;
pub mod types;
pub mod utility;
pub mod validate;

pub use aggregate::{INSUFFICIENT_QUARTER_HOUR_REASON, InsufficientPolicy, aggregate};
pub use validate::validate_window;
