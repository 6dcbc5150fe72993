//! Strategy layer — asset ranking and risk policy.

pub mod ranking;
pub mod risk;
