use std::any::TypeId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bus::Bus;
use crate::logging::Logger;
use crate::service::Service;

/// Cooperative stop flag shared between the orchestrator and anything that
/// may ask it to stop (services, the application, input threads).
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the orchestrator to stop at the start of its next step.
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Typed access to the services enabled on an orchestrator.
pub(crate) trait ServiceLookup {
    fn find(&self, type_id: TypeId) -> Option<&dyn Service>;
}

struct NoServices;

impl ServiceLookup for NoServices {
    fn find(&self, _type_id: TypeId) -> Option<&dyn Service> {
        None
    }
}

/// Everything a lifecycle hook can reach besides its own state.
pub struct Context<'a> {
    lookup: &'a dyn ServiceLookup,
    bus: &'a Arc<Bus>,
    logger: &'a Arc<Logger>,
    stop: &'a StopHandle,
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        lookup: &'a dyn ServiceLookup,
        bus: &'a Arc<Bus>,
        logger: &'a Arc<Logger>,
        stop: &'a StopHandle,
    ) -> Self {
        Self {
            lookup,
            bus,
            logger,
            stop,
        }
    }

    /// Another enabled service, by concrete type.
    ///
    /// Returns `None` if no service of type `T` is enabled, or if `T` is the
    /// service whose hook is currently running.
    pub fn service<T: Service>(&self) -> Option<&'a T> {
        self.lookup
            .find(TypeId::of::<T>())
            .and_then(|service| service.as_any().downcast_ref::<T>())
    }

    pub fn bus(&self) -> &'a Arc<Bus> {
        self.bus
    }

    pub fn logger(&self) -> &'a Arc<Logger> {
        self.logger
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn request_stop(&self) {
        self.stop.request();
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_requested()
    }
}

/// Owns the shared parts of a [`Context`] so a service can be driven outside
/// an orchestrator, e.g. in unit tests. Lookups of other services always
/// return `None`.
#[derive(Default)]
pub struct Detached {
    pub bus: Arc<Bus>,
    pub logger: Arc<Logger>,
    pub stop: StopHandle,
}

impl Detached {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_logger(logger: Arc<Logger>) -> Self {
        Self {
            logger,
            ..Self::default()
        }
    }

    pub fn context(&self) -> Context<'_> {
        Context::new(&NoServices, &self.bus, &self.logger, &self.stop)
    }
}
