use std::any::Any;

use anyhow::Result;

use crate::context::Context;
use crate::settings::Settings;

/// The single top-level unit an orchestrator drives once every service is
/// initialized.
///
/// Its settings live in their own document named after
/// [`name`](Application::name).
pub trait Application: Any {
    fn name(&self) -> &str;

    fn settings(&self) -> &Settings {
        static NONE: Settings = Settings::new();
        &NONE
    }

    fn init(&mut self, _ctx: &Context<'_>) -> Result<()> {
        Ok(())
    }

    fn update(&mut self, ctx: &Context<'_>) -> Result<()>;

    fn shutdown(&mut self, _ctx: &Context<'_>) -> Result<()> {
        Ok(())
    }

    /// Once this returns `true` the orchestrator stops.
    fn finished(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
