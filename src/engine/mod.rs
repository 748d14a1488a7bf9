//! Signal engine — pure detectors at the bottom, the tick pipelines on top.

pub mod analysis;
pub mod confluence;
pub mod decision_parse;
pub mod gate;
pub mod indicators;
pub mod key_levels;
pub mod lifecycle;
pub mod prompt;
pub mod request;
pub mod resilience;
pub mod router;
pub mod session;
pub mod sizer;
pub mod sweep;
