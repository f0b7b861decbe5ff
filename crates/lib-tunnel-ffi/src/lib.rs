//! # lib-tunnel-ffi
//!
//! Safe FFI wrappers and stream driver for vendor camera tunnel libraries.
//!
//! This crate loads a vendor-supplied tunnel library (`.so`/`.dll`) at
//! runtime and drives it to pull encoded camera samples. It handles:
//!
//! - Dynamic library loading and symbol resolution with `libloading`
//! - Tunnel lifecycle management (Create/Open/StartStream/Close/Destroy)
//! - Fixed-interval polling while the library reports would-block
//! - Forwarding vendor log messages and handing them back for release
//! - Restarting the stream from a fresh tunnel after in-stream failures
//!
//! # Safety
//!
//! Vendor binaries are untrusted code. Every required entry point is
//! resolved before the first call, each tunnel is closed and destroyed
//! exactly once, and the log callback never unwinds into the library.

pub mod api;
pub mod driver;
pub mod error;
pub mod lifecycle;
pub mod loader;
pub mod logbridge;

#[cfg(any(test, feature = "testing"))]
pub mod fake;

pub use api::{TunnelApi, TunnelHandle};
pub use driver::{DriverConfig, DriverStats, StreamDriver, DEFAULT_POLL_INTERVAL};
pub use error::{TunnelError, TunnelResult};
pub use lifecycle::{Pacer, ThreadPacer, TunnelSession};
pub use loader::TunnelLibrary;
pub use logbridge::{Delivery, LogForwarder, DEFAULT_MAX_FORWARDED_LEVEL};
