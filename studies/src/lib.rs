//! View factor studies

#[macro_use]
extern crate log;

// Re-export.
pub mod bcs;
pub mod matrix;
pub mod postprocessor;
pub mod start_elem;
pub mod study;
pub mod trace;
pub mod unobstructed;
