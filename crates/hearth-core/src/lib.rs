//! Core infrastructure for the Hearth runtime.
//!
//! This crate provides the building blocks shared by the application binary
//! and every Hearth service: the structured logger, a typed publish/subscribe
//! bus, the service and application contracts, settings bindings, and the
//! orchestrator that drives them.

pub mod application;
pub mod bus;
pub mod context;
pub mod event;
pub mod logging;
pub mod orchestrator;
pub mod service;
pub mod settings;

pub use application::Application;
pub use bus::{Bus, Subscription};
pub use context::{Context, Detached, StopHandle};
pub use orchestrator::{Orchestrator, OrchestratorError, OrchestratorOptions, RunReport};
pub use service::{Service, ServiceCore};
pub use settings::Settings;
