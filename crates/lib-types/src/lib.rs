//! # lib-types
//!
//! Core value types for the tunnel-stream workspace.
//!
//! This crate provides the plain data shared by the FFI layer and the CLI:
//! - Vendor status codes and their classification
//! - Negotiated stream metadata and media samples
//! - The tunnel session state machine
//! - Camera addresses that keep credentials out of logs

pub mod camera;
pub mod tunnel;

pub use camera::*;
pub use tunnel::*;
