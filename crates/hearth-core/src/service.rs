use std::any::Any;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::context::Context;
use crate::settings::Settings;
use crate::{log_message, log_warning};

/// Identity, dependencies and settings shared by every service.
///
/// Services embed one of these and expose it through
/// [`Service::core`] / [`Service::core_mut`].
#[derive(Debug, Clone)]
pub struct ServiceCore {
    name: String,
    dependencies: Vec<String>,
    settings: Settings,
}

impl ServiceCore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            settings: Settings::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Require `name` to finish initializing before this service.
    ///
    /// Duplicates and self-dependencies are ignored with a warning; returns
    /// whether the dependency was added.
    pub fn add_dependency(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if name == self.name {
            log_warning!("service {:?} cannot depend on itself; ignoring", self.name);
            return false;
        }
        if self.depends_on(&name) {
            log_warning!(
                "service {:?} already depends on {:?}; ignoring duplicate",
                self.name,
                name
            );
            return false;
        }
        self.dependencies.push(name);
        true
    }

    /// Builder form of [`add_dependency`](Self::add_dependency).
    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.add_dependency(name);
        self
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn depends_on(&self, name: &str) -> bool {
        self.dependencies.iter().any(|d| d == name)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Expose a field of the service `S` as the setting `name`.
    ///
    /// `get` and `get_mut` project the owning service onto the field; the
    /// service keeps ownership of the value.
    pub fn register_setting<S, T, G, M>(&mut self, name: impl Into<String>, get: G, get_mut: M) -> bool
    where
        S: 'static,
        T: Serialize + DeserializeOwned + 'static,
        G: Fn(&S) -> &T + Send + Sync + 'static,
        M: Fn(&mut S) -> &mut T + Send + Sync + 'static,
    {
        self.settings.register(name, get, get_mut)
    }
}

/// An orchestrated unit of functionality.
///
/// Services are enabled on an [`Orchestrator`](crate::orchestrator::Orchestrator),
/// which initializes them once their dependencies are initialized, calls
/// [`update`](Service::update) every tick, and shuts them down in reverse
/// initialization order. Every service must provide a
/// [`self_test`](Service::self_test), run when no primary application is
/// configured.
pub trait Service: Any {
    fn core(&self) -> &ServiceCore;

    fn core_mut(&mut self) -> &mut ServiceCore;

    fn name(&self) -> &str {
        self.core().name()
    }

    /// Called once all dependencies are initialized, after persisted settings
    /// have been applied. An error leaves the service uninitialized and it is
    /// retried on the next scheduling pass.
    fn init(&mut self, ctx: &Context<'_>) -> Result<()> {
        log_message!(logger: ctx.logger(), "{}: initialized", self.name());
        Ok(())
    }

    /// Called every tick once every service is initialized.
    fn update(&mut self, _ctx: &Context<'_>) -> Result<()> {
        Ok(())
    }

    /// Called once on stop, before the service's settings are saved.
    fn shutdown(&mut self, ctx: &Context<'_>) -> Result<()> {
        log_message!(logger: ctx.logger(), "{}: shut down", self.name());
        Ok(())
    }

    /// Headless self-verification, run when no application is configured.
    fn self_test(&mut self, ctx: &Context<'_>) -> Result<()>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
