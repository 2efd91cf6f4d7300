//! Service registry, initialization scheduler and main loop.
//!
//! The [`Orchestrator`] owns every enabled [`Service`] and at most one
//! [`Application`]. Each [`step`](Orchestrator::step) either makes one
//! scheduling pass over the uninitialized services, or (once all of them are
//! initialized) updates every service followed by the application. Stopping
//! shuts the application down first, then the services in exact reverse of
//! the order in which they finished initializing, saving every settings blob
//! back to the configuration store.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hearth_config::{application_path, services_path, ConfigStore, RuntimeSection};
use serde_json::Value;

use crate::application::Application;
use crate::bus::Bus;
use crate::context::{Context, ServiceLookup, StopHandle};
use crate::logging::{self, Logger};
use crate::service::Service;
use crate::settings::Settings;
use crate::{log_debug, log_error, log_fatal, log_message, log_warning};

/// Lifecycle state of an enabled service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Uninitialized,
    Initialized,
    ShutDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AppState {
    Pending,
    Running,
    Failed,
    ShutDown,
}

/// A service that could not be initialized when the scheduler stalled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingService {
    pub name: String,
    /// Dependencies not yet initialized. Empty when the service's own `init`
    /// kept failing.
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    DuplicateName(String),
    DuplicateType {
        name: String,
        type_name: &'static str,
    },
    ApplicationActive(String),
    Stalled {
        pending: Vec<PendingService>,
    },
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateName(name) => write!(f, "a service named {name:?} is already enabled"),
            Self::DuplicateType { name, type_name } => write!(
                f,
                "cannot enable {name:?}: a service of type {type_name} is already enabled"
            ),
            Self::ApplicationActive(name) => {
                write!(f, "application {name:?} is running and cannot be replaced")
            }
            Self::Stalled { pending } => {
                write!(
                    f,
                    "service initialization stalled (cyclic or unsatisfiable dependencies):"
                )?;
                for (i, service) in pending.iter().enumerate() {
                    let sep = if i == 0 { " " } else { ", " };
                    if service.missing.is_empty() {
                        write!(f, "{sep}{} (init keeps failing)", service.name)?;
                    } else {
                        write!(
                            f,
                            "{sep}{} (waiting on {})",
                            service.name,
                            service.missing.join(", ")
                        )?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for OrchestratorError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorOptions {
    /// Directory for the settings documents. `None` keeps settings in memory.
    pub config_dir: Option<PathBuf>,
    /// Minimum wall time between steps in [`Orchestrator::run`].
    pub tick_interval: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            config_dir: Some(PathBuf::from("config")),
            tick_interval: Duration::from_millis(16),
        }
    }
}

impl OrchestratorOptions {
    /// No persistence and no pacing.
    pub fn in_memory() -> Self {
        Self {
            config_dir: None,
            tick_interval: Duration::ZERO,
        }
    }
}

impl From<&RuntimeSection> for OrchestratorOptions {
    fn from(section: &RuntimeSection) -> Self {
        Self {
            config_dir: Some(section.config_dir.clone()),
            tick_interval: Duration::from_millis(section.tick_interval_ms),
        }
    }
}

/// Outcome of a completed [`Orchestrator::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub init_order: Vec<String>,
    pub shutdown_order: Vec<String>,
    /// Steps that updated services and the application.
    pub ticks: u64,
    pub passes: usize,
    pub self_test_failures: Vec<String>,
    pub application_failed: bool,
}

struct Slot {
    name: String,
    service: Option<Box<dyn Service>>,
    state: ServiceState,
}

struct Directory<'a> {
    slots: &'a [Slot],
    types: &'a HashMap<TypeId, usize>,
}

impl ServiceLookup for Directory<'_> {
    fn find(&self, type_id: TypeId) -> Option<&dyn Service> {
        let idx = *self.types.get(&type_id)?;
        self.slots.get(idx)?.service.as_deref()
    }
}

pub struct Orchestrator {
    options: OrchestratorOptions,
    slots: Vec<Slot>,
    names: HashMap<String, usize>,
    types: HashMap<TypeId, usize>,
    /// Slot indices in achieved initialization order.
    init_order: Vec<usize>,
    shutdown_order: Vec<String>,
    uninitialized: usize,
    idle_passes: u32,
    passes: usize,
    ticks: u64,
    store: ConfigStore,
    application: Option<Box<dyn Application>>,
    app_state: AppState,
    app_settings: Option<Value>,
    self_tested: bool,
    self_test_failures: Vec<String>,
    phase: Phase,
    bus: Arc<Bus>,
    logger: Arc<Logger>,
    stop: StopHandle,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(OrchestratorOptions::default())
    }
}

impl Orchestrator {
    pub fn new(options: OrchestratorOptions) -> Self {
        Self {
            options,
            slots: Vec::new(),
            names: HashMap::new(),
            types: HashMap::new(),
            init_order: Vec::new(),
            shutdown_order: Vec::new(),
            uninitialized: 0,
            idle_passes: 0,
            passes: 0,
            ticks: 0,
            store: ConfigStore::new(),
            application: None,
            app_state: AppState::Pending,
            app_settings: None,
            self_tested: false,
            self_test_failures: Vec::new(),
            phase: Phase::Idle,
            bus: Arc::new(Bus::new()),
            logger: Arc::clone(logging::global()),
            stop: StopHandle::new(),
        }
    }

    /// Log through `logger` instead of the process-wide one.
    pub fn with_logger(mut self, logger: Arc<Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Share an existing bus.
    pub fn with_bus(mut self, bus: Arc<Bus>) -> Self {
        self.bus = bus;
        self
    }

    /// Register a service. Its name and its concrete type must both be
    /// unique among enabled services.
    pub fn enable<S: Service>(&mut self, service: S) -> Result<(), OrchestratorError> {
        let name = service.name().to_string();
        if self.names.contains_key(&name) {
            log_warning!(logger: self.logger, "service {name:?} is already enabled");
            return Err(OrchestratorError::DuplicateName(name));
        }
        let type_id = TypeId::of::<S>();
        if self.types.contains_key(&type_id) {
            let type_name = std::any::type_name::<S>();
            log_warning!(
                logger: self.logger,
                "a service of type {type_name} is already enabled; cannot enable {name:?}"
            );
            return Err(OrchestratorError::DuplicateType { name, type_name });
        }

        let idx = self.slots.len();
        self.names.insert(name.clone(), idx);
        self.types.insert(type_id, idx);
        log_debug!(
            logger: self.logger,
            "enabled service {name:?} (depends on: {:?})",
            service.core().dependencies()
        );
        self.slots.push(Slot {
            name,
            service: Some(Box::new(service)),
            state: ServiceState::Uninitialized,
        });
        self.uninitialized += 1;
        Ok(())
    }

    /// Install the primary application. An application that has not been
    /// initialized yet is replaced.
    pub fn set_application<A: Application>(&mut self, app: A) -> Result<(), OrchestratorError> {
        if let Some(current) = &self.application {
            if self.app_state == AppState::Running {
                return Err(OrchestratorError::ApplicationActive(current.name().to_string()));
            }
            log_warning!(
                logger: self.logger,
                "replacing application {:?} with {:?}",
                current.name(),
                app.name()
            );
        }
        self.application = Some(Box::new(app));
        self.app_state = AppState::Pending;
        self.app_settings = None;
        Ok(())
    }

    /// The enabled service of type `T`.
    pub fn get<T: Service>(&self) -> Option<&T> {
        let idx = *self.types.get(&TypeId::of::<T>())?;
        self.slots[idx]
            .service
            .as_deref()
            .and_then(|s| s.as_any().downcast_ref::<T>())
    }

    pub fn get_mut<T: Service>(&mut self) -> Option<&mut T> {
        let idx = *self.types.get(&TypeId::of::<T>())?;
        self.slots[idx]
            .service
            .as_deref_mut()
            .and_then(|s| s.as_any_mut().downcast_mut::<T>())
    }

    pub fn application<A: Application>(&self) -> Option<&A> {
        self.application
            .as_deref()
            .and_then(|app| app.as_any().downcast_ref::<A>())
    }

    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    pub fn logger(&self) -> &Arc<Logger> {
        &self.logger
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn request_stop(&self) {
        self.stop.request();
    }

    /// Whether the loop has started and not yet stopped.
    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    /// Names of services in the order they finished initializing.
    pub fn init_order(&self) -> Vec<&str> {
        self.init_order
            .iter()
            .map(|&idx| self.slots[idx].name.as_str())
            .collect()
    }

    pub fn shutdown_order(&self) -> &[String] {
        &self.shutdown_order
    }

    /// Names of enabled services in registration order.
    pub fn service_names(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn state_of(&self, name: &str) -> Option<ServiceState> {
        self.names.get(name).map(|&idx| self.slots[idx].state)
    }

    pub fn uninitialized_count(&self) -> usize {
        self.uninitialized
    }

    /// Scheduling passes made so far.
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Update ticks so far. Scheduling passes and self-test steps are not
    /// counted.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Load persisted settings and enter the running phase. Called by the
    /// first [`step`](Self::step) if not called explicitly.
    pub fn start(&mut self) {
        if self.phase != Phase::Idle {
            return;
        }
        self.load_settings();
        self.phase = Phase::Running;
        log_message!(
            logger: self.logger,
            "orchestrator started with {} service(s)",
            self.slots.len()
        );
    }

    /// One iteration of the main loop.
    ///
    /// Returns an error only when initialization has stalled; the services
    /// initialized so far have been shut down by then.
    pub fn step(&mut self) -> Result<(), OrchestratorError> {
        self.start();
        if self.phase != Phase::Running {
            return Ok(());
        }
        if self.stop.is_requested() {
            self.stop();
            return Ok(());
        }
        if self.uninitialized > 0 {
            if let Err(err) = self.schedule_pass() {
                self.stop();
                return Err(err);
            }
            return Ok(());
        }

        if self.application.is_none() {
            if !self.self_tested {
                self.run_self_tests();
            }
            self.stop.request();
            return Ok(());
        }

        if self.app_state == AppState::Pending {
            self.start_application();
            if self.app_state != AppState::Running {
                self.stop.request();
                return Ok(());
            }
        }

        self.ticks += 1;
        self.update_services();
        self.update_application();
        Ok(())
    }

    /// Drive the loop until stopped, pacing steps to the tick interval.
    pub fn run(&mut self) -> Result<RunReport, OrchestratorError> {
        self.start();
        while self.phase == Phase::Running {
            let started = Instant::now();
            self.step()?;
            if self.phase != Phase::Running {
                break;
            }
            let rest = self.options.tick_interval.saturating_sub(started.elapsed());
            if !rest.is_zero() {
                std::thread::sleep(rest);
            }
        }
        Ok(self.report())
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            init_order: self.init_order().into_iter().map(str::to_string).collect(),
            shutdown_order: self.shutdown_order.clone(),
            ticks: self.ticks,
            passes: self.passes,
            self_test_failures: self.self_test_failures.clone(),
            application_failed: self.app_state == AppState::Failed,
        }
    }

    /// Shut down the application, then every initialized service in reverse
    /// initialization order, and persist their settings. Idempotent.
    ///
    /// Stopping before [`start`](Self::start) leaves the settings files
    /// untouched.
    pub fn stop(&mut self) {
        match self.phase {
            Phase::Stopped => return,
            Phase::Idle => {
                self.phase = Phase::Stopped;
                log_debug!(logger: self.logger, "orchestrator stopped before starting");
                return;
            }
            Phase::Running => {}
        }
        self.phase = Phase::Stopped;
        log_message!(logger: self.logger, "orchestrator stopping");

        self.shutdown_application();
        self.shutdown_services();
        self.persist_services();
    }

    fn with_context<R>(&self, f: impl FnOnce(&Context<'_>) -> R) -> R {
        let directory = Directory {
            slots: &self.slots,
            types: &self.types,
        };
        let ctx = Context::new(&directory, &self.bus, &self.logger, &self.stop);
        f(&ctx)
    }

    fn load_settings(&mut self) {
        let Some(dir) = self.options.config_dir.clone() else {
            return;
        };

        let path = services_path(&dir);
        if path.exists() {
            match ConfigStore::load(&path) {
                Ok(store) => {
                    log_message!(
                        logger: self.logger,
                        "loaded settings for {} service(s) from {}",
                        store.len(),
                        path.display()
                    );
                    self.store = store;
                }
                Err(err) => log_warning!(logger: self.logger, "{err:#}; using defaults"),
            }
        } else {
            log_warning!(
                logger: self.logger,
                "no settings file at {}; using defaults",
                path.display()
            );
        }
    }

    /// Read `<name>.app.json` unless this run already holds the
    /// application's settings.
    fn load_application_settings(&mut self, name: &str) {
        if self.app_settings.is_some() {
            return;
        }
        let Some(dir) = &self.options.config_dir else {
            return;
        };
        let path = application_path(dir, name);
        if !path.exists() {
            log_warning!(
                logger: self.logger,
                "no application settings at {}; using defaults",
                path.display()
            );
            return;
        }
        match ConfigStore::load(&path) {
            Ok(doc) => self.app_settings = Some(doc.into_value()),
            Err(err) => log_warning!(logger: self.logger, "{err:#}; using defaults"),
        }
    }

    fn apply_settings(&self, service: &mut dyn Service) {
        let name = service.name().to_string();
        let Some(blob) = self.store.get(&name) else {
            log_warning!(
                logger: self.logger,
                "no saved settings for service {name:?}; using defaults"
            );
            return;
        };
        let settings = service.core().settings().clone();
        for err in settings.load(service.as_any_mut(), blob) {
            log_warning!(logger: self.logger, "service {name:?}: {err:#}");
        }
    }

    fn schedule_pass(&mut self) -> Result<(), OrchestratorError> {
        self.passes += 1;
        let before = self.uninitialized;

        for idx in 0..self.slots.len() {
            if self.slots[idx].state != ServiceState::Uninitialized {
                continue;
            }
            if self.missing_dependencies(idx).is_empty() {
                self.initialize(idx);
            }
        }

        if self.uninitialized < before {
            self.idle_passes = 0;
            return Ok(());
        }

        self.idle_passes += 1;
        log_debug!(
            logger: self.logger,
            "scheduling pass {} made no progress ({} pending)",
            self.passes,
            self.uninitialized
        );
        if self.idle_passes < 2 {
            return Ok(());
        }

        let pending = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.state == ServiceState::Uninitialized)
            .map(|(idx, slot)| PendingService {
                name: slot.name.clone(),
                missing: self.missing_dependencies(idx),
            })
            .collect();
        let err = OrchestratorError::Stalled { pending };
        log_fatal!(logger: self.logger, "{err}");
        Err(err)
    }

    fn missing_dependencies(&self, idx: usize) -> Vec<String> {
        let Some(service) = self.slots[idx].service.as_deref() else {
            return Vec::new();
        };
        service
            .core()
            .dependencies()
            .iter()
            .filter(|dep| {
                !self
                    .init_order
                    .iter()
                    .any(|&done| self.slots[done].name == **dep)
            })
            .cloned()
            .collect()
    }

    fn initialize(&mut self, idx: usize) {
        let Some(mut service) = self.slots[idx].service.take() else {
            return;
        };
        self.apply_settings(&mut *service);
        let result = self.with_context(|ctx| service.init(ctx));
        self.slots[idx].service = Some(service);

        let name = &self.slots[idx].name;
        match result {
            Ok(()) => {
                log_message!(logger: self.logger, "service {name:?} initialized");
                self.slots[idx].state = ServiceState::Initialized;
                self.init_order.push(idx);
                self.uninitialized -= 1;
            }
            Err(err) => {
                log_error!(
                    logger: self.logger,
                    "failed to initialize service {name:?}: {err:#}; retrying next pass"
                );
            }
        }
    }

    fn run_self_tests(&mut self) {
        self.self_tested = true;
        log_message!(
            logger: self.logger,
            "no application configured; running service self-tests"
        );

        for pos in 0..self.init_order.len() {
            let idx = self.init_order[pos];
            let Some(mut service) = self.slots[idx].service.take() else {
                continue;
            };
            let result = self.with_context(|ctx| service.self_test(ctx));
            self.slots[idx].service = Some(service);

            let name = &self.slots[idx].name;
            match result {
                Ok(()) => log_message!(logger: self.logger, "self-test passed: {name}"),
                Err(err) => {
                    log_error!(logger: self.logger, "self-test failed: {name}: {err:#}");
                    self.self_test_failures.push(format!("{name}: {err:#}"));
                }
            }
        }

        log_message!(
            logger: self.logger,
            "self-tests complete: {} passed, {} failed",
            self.init_order.len() - self.self_test_failures.len(),
            self.self_test_failures.len()
        );
    }

    fn start_application(&mut self) {
        let Some(name) = self.application.as_ref().map(|app| app.name().to_string()) else {
            return;
        };
        self.load_application_settings(&name);
        let Some(mut app) = self.application.take() else {
            return;
        };

        match &self.app_settings {
            Some(blob) => {
                let settings: Settings = app.settings().clone();
                for err in settings.load(app.as_any_mut(), blob) {
                    log_warning!(logger: self.logger, "application {name:?}: {err:#}");
                }
            }
            None => log_debug!(
                logger: self.logger,
                "no saved settings for application {name:?}"
            ),
        }

        let result = self.with_context(|ctx| app.init(ctx));
        self.application = Some(app);

        match result {
            Ok(()) => {
                self.app_state = AppState::Running;
                log_message!(logger: self.logger, "application {name:?} initialized");
            }
            Err(err) => {
                self.app_state = AppState::Failed;
                log_error!(
                    logger: self.logger,
                    "failed to initialize application {name:?}: {err:#}; stopping"
                );
            }
        }
    }

    fn update_services(&mut self) {
        for pos in 0..self.init_order.len() {
            let idx = self.init_order[pos];
            let Some(mut service) = self.slots[idx].service.take() else {
                continue;
            };
            let result = self.with_context(|ctx| service.update(ctx));
            self.slots[idx].service = Some(service);

            if let Err(err) = result {
                log_error!(
                    logger: self.logger,
                    "service {:?} update failed: {err:#}",
                    self.slots[idx].name
                );
            }
        }
    }

    fn update_application(&mut self) {
        let Some(mut app) = self.application.take() else {
            return;
        };
        let result = self.with_context(|ctx| app.update(ctx));
        let finished = app.finished();
        let name = app.name().to_string();
        self.application = Some(app);

        if let Err(err) = result {
            log_error!(logger: self.logger, "application {name:?} update failed: {err:#}");
        }
        if finished {
            log_message!(logger: self.logger, "application {name:?} finished");
            self.stop.request();
        }
    }

    fn shutdown_application(&mut self) {
        if self.app_state != AppState::Running {
            return;
        }
        let Some(mut app) = self.application.take() else {
            return;
        };
        let name = app.name().to_string();
        let result = self.with_context(|ctx| app.shutdown(ctx));
        let saved = app.settings().save(app.as_any());
        self.application = Some(app);
        self.app_state = AppState::ShutDown;

        if let Err(err) = result {
            log_error!(logger: self.logger, "application {name:?} shutdown failed: {err:#}");
        }
        let blob = match saved {
            Ok(blob) => blob,
            Err(err) => {
                log_error!(
                    logger: self.logger,
                    "failed to serialize application {name:?} settings: {err:#}"
                );
                return;
            }
        };
        self.app_settings = Some(blob.clone());

        let Some(dir) = &self.options.config_dir else {
            return;
        };
        let path = application_path(dir, &name);
        let written = ConfigStore::from_value(blob).and_then(|doc| doc.save(&path));
        match written {
            Ok(()) => log_debug!(
                logger: self.logger,
                "saved application settings to {}",
                path.display()
            ),
            Err(err) => log_error!(
                logger: self.logger,
                "{err:#}; application settings from this run are discarded"
            ),
        }
    }

    fn shutdown_services(&mut self) {
        for pos in (0..self.init_order.len()).rev() {
            let idx = self.init_order[pos];
            if self.slots[idx].state != ServiceState::Initialized {
                continue;
            }
            let Some(mut service) = self.slots[idx].service.take() else {
                continue;
            };
            let result = self.with_context(|ctx| service.shutdown(ctx));
            let saved = service.core().settings().save(service.as_any());
            self.slots[idx].service = Some(service);

            let name = self.slots[idx].name.clone();
            self.slots[idx].state = ServiceState::ShutDown;
            if let Err(err) = result {
                log_error!(logger: self.logger, "service {name:?} shutdown failed: {err:#}");
            }
            match saved {
                Ok(blob) => self.store.set(name.clone(), blob),
                Err(err) => log_error!(
                    logger: self.logger,
                    "failed to serialize settings of service {name:?}: {err:#}"
                ),
            }
            self.shutdown_order.push(name);
        }
    }

    fn persist_services(&self) {
        let Some(dir) = &self.options.config_dir else {
            return;
        };
        let path = services_path(dir);
        match self.store.save(&path) {
            Ok(()) => log_debug!(logger: self.logger, "saved settings to {}", path.display()),
            Err(err) => log_error!(
                logger: self.logger,
                "{err:#}; settings from this run are discarded"
            ),
        }
    }

    /// Settings blob currently held for `name` (loaded, or saved on stop).
    pub fn stored_settings(&self, name: &str) -> Option<&Value> {
        self.store.get(name)
    }
}
