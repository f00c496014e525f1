//! Per-sample rejection stage.
//!
//! Stateless checks run first, then the ordered wind-stow pass. Each filter
//! only ever clears validity and appends reasons.

pub mod point;
pub mod wind_stow;

pub use point::apply_point_rejections;
pub use wind_stow::apply_wind_stow;
