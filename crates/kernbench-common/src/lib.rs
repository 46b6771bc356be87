//! Common types and utilities for the kernbench harness
//!
//! This crate provides the foundational pieces shared by the kernel crate and
//! the C export surface: the error taxonomy, harness configuration and a few
//! small math helpers.

pub mod config;
pub mod error;
pub mod math;

pub use config::*;
pub use error::*;
pub use math::ceil_div;
