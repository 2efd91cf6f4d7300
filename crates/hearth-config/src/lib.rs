//! Configuration types and loaders for Hearth.
//!
//! This crate owns the on-disk schemas so the runtime and the binary share a
//! single source of truth: the per-service settings store and the runtime
//! configuration file.

pub mod runtime;
pub mod store;

pub use runtime::{LoggingConfig, RuntimeConfig, RuntimeSection};
pub use store::{application_path, services_path, ConfigStore, APPLICATION_SUFFIX, SERVICES_FILE};
