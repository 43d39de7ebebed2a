//! HTML views rendered by the demo site.

pub mod views;
