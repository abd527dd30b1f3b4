//! Core

// Re-export.
pub mod comm;
pub mod common;
pub mod error;
pub mod geometry;
pub mod mesh;
pub mod packing;
pub mod quadrature;
pub mod ray;
