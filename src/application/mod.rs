//! Application services.

pub mod catalog;
pub mod error;
pub mod purge;
