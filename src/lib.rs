//! rsoemcrypto - OEMCrypto dynamic adapter.
//!
//! This crate provides:
//! - Resolution of a vendor Level 1 OEMCrypto module at API versions 8 to 14.
//! - Fallback to the built-in Level 3 engine when Level 1 is unusable.
//! - A single session namespace across both implementations.
//! - Per-version translation of legacy entry point shapes.
//! - Deadline supervision of Level 3 bring-up.
//!
//! Feature flags:
//! - `cli`: enable the CLI binary helpers.
//! - `chrono`: use chrono for watchdog timestamps.
//! - `log`: route internal logging through `log` (default).
//! - `tracing`: route internal logging through `tracing`.
#![allow(clippy::result_large_err)]

#[macro_use]
mod macros;

/// The adapter context and dispatch surface.
pub mod adapter;
/// YAML configuration.
pub mod config;
/// Raw entry points of one implementation.
pub mod engine;
/// Common error types and Result alias.
pub mod error;
/// C layouts and function signatures.
pub mod ffi;
/// Version-bound implementations and their capability sets.
pub mod implementation;
/// Initialization metrics.
pub mod metrics;
/// Engines backed by native entry points.
pub mod native;
/// Level 1 provisioning checks.
pub mod provisioning;
/// Session handle registry.
pub mod registry;
/// Per-version ABI translation.
pub mod shim;
/// Symbol tables and resolution.
pub mod symbols;
/// OEMCrypto value types.
pub mod types;
/// Shared helper utilities.
pub mod utils;
/// Level 3 bring-up supervision.
pub mod watchdog;

pub use adapter::{Adapter, Level1Source};
pub use config::AdapterConfig;
pub use error::{Error, Result};
pub use registry::SessionId;
pub use types::{OemCryptoResult, SecurityLevel};
