use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use hearth_core::event::Telemetry;
use hearth_core::{log_message, Application, Context, Settings, Subscription};
use hearth_mod_input::KeyInput;

type Readings = Arc<Mutex<BTreeMap<String, String>>>;

/// Primary application of the `hearth` binary: collects telemetry and key
/// presses from the bus and reports them periodically.
pub struct DemoApp {
    settings: Settings,
    run_for_frames: u64,
    report_every: u64,
    frames: u64,
    readings: Readings,
    keys: Arc<Mutex<Vec<String>>>,
    subscriptions: Vec<Subscription>,
}

impl Default for DemoApp {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoApp {
    pub fn new() -> Self {
        let mut settings = Settings::new();
        settings.register(
            "run_for_frames",
            |a: &DemoApp| &a.run_for_frames,
            |a: &mut DemoApp| &mut a.run_for_frames,
        );
        settings.register(
            "report_every",
            |a: &DemoApp| &a.report_every,
            |a: &mut DemoApp| &mut a.report_every,
        );
        Self {
            settings,
            run_for_frames: 0,
            report_every: 120,
            frames: 0,
            readings: Arc::default(),
            keys: Arc::default(),
            subscriptions: Vec::new(),
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn summary(&self) -> String {
        let readings = self.readings.lock().unwrap_or_else(|e| e.into_inner());
        if readings.is_empty() {
            return "no telemetry yet".into();
        }
        readings
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Application for DemoApp {
    fn name(&self) -> &str {
        "demo"
    }

    fn settings(&self) -> &Settings {
        &self.settings
    }

    fn init(&mut self, ctx: &Context<'_>) -> Result<()> {
        let readings = Arc::clone(&self.readings);
        self.subscriptions.push(ctx.bus().subscribe(move |t: &Telemetry| {
            readings
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(format!("{}.{}", t.source, t.key), t.value.to_string());
        }));

        let keys = Arc::clone(&self.keys);
        self.subscriptions.push(ctx.bus().subscribe(move |k: &KeyInput| {
            keys.lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(k.label.clone());
        }));

        if self.run_for_frames > 0 {
            log_message!(
                logger: ctx.logger(),
                "demo: running for {} frames",
                self.run_for_frames
            );
        } else {
            log_message!(logger: ctx.logger(), "demo: running until a quit key is pressed");
        }
        Ok(())
    }

    fn update(&mut self, ctx: &Context<'_>) -> Result<()> {
        self.frames += 1;
        if self.report_every > 0 && self.frames % self.report_every == 0 {
            log_message!(
                logger: ctx.logger(),
                "demo: frame {}: {}",
                self.frames,
                self.summary()
            );
        }
        Ok(())
    }

    fn shutdown(&mut self, ctx: &Context<'_>) -> Result<()> {
        self.subscriptions.clear();
        let keys = self.keys.lock().unwrap_or_else(|e| e.into_inner()).len();
        log_message!(
            logger: ctx.logger(),
            "demo: {} frames, {} key presses; {}",
            self.frames,
            keys,
            self.summary()
        );
        Ok(())
    }

    fn finished(&self) -> bool {
        self.run_for_frames > 0 && self.frames >= self.run_for_frames
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::event::TelemetryValue;
    use hearth_core::logging::{Logger, RingSink};
    use hearth_core::{Detached, Orchestrator, OrchestratorOptions};
    use hearth_mod_clock::ClockService;

    #[test]
    fn finishes_after_configured_frames() {
        let mut app = DemoApp::new();
        let blob = serde_json::json!({"run_for_frames": 2, "report_every": 0});
        assert!(app.settings().clone().load(app.as_any_mut(), &blob).is_empty());

        let detached = Detached::new();
        let ctx = detached.context();
        app.init(&ctx).unwrap();
        app.update(&ctx).unwrap();
        assert!(!app.finished());
        app.update(&ctx).unwrap();
        assert!(app.finished());
    }

    #[test]
    fn collects_telemetry_until_shutdown() {
        let detached = Detached::new();
        let ctx = detached.context();
        let mut app = DemoApp::new();
        app.init(&ctx).unwrap();

        detached
            .bus
            .broadcast(&Telemetry::new("stats", "cpu", TelemetryValue::Float(12.5)));
        assert_eq!(app.summary(), "stats.cpu=12.50");

        app.shutdown(&ctx).unwrap();
        detached
            .bus
            .broadcast(&Telemetry::new("stats", "cpu", TelemetryValue::Float(99.0)));
        assert_eq!(app.summary(), "stats.cpu=12.50");
    }

    #[test]
    fn runs_under_orchestrator() {
        let logger = Arc::new(Logger::new());
        let ring = Arc::new(RingSink::new(64));
        logger.add(ring.clone());

        let mut orch = Orchestrator::new(OrchestratorOptions::in_memory()).with_logger(logger);
        orch.enable(ClockService::new()).unwrap();
        let mut app = DemoApp::new();
        app.run_for_frames = 5;
        orch.set_application(app).unwrap();

        let report = orch.run().unwrap();
        assert!(!report.application_failed);
        assert_eq!(orch.application::<DemoApp>().unwrap().frames(), 5);
        assert_eq!(orch.get::<ClockService>().unwrap().frame(), 5);
    }
}
