//! Host statistics service.
//!
//! Samples CPU and memory usage at most once per `sample_interval_ms`, driven
//! by the clock's [`FrameTick`] messages, and publishes each figure as a
//! [`Telemetry`] message.

mod sampler;

use std::any::Any;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{ensure, Context as _, Result};

use hearth_core::event::{FrameTick, Telemetry, TelemetryValue};
use hearth_core::{log_message, Context, Service, ServiceCore, Subscription};
use hearth_mod_clock::ClockService;

pub use sampler::{human_bytes, Sample, Sampler};

pub const NAME: &str = "stats";

const MIN_INTERVAL_MS: u64 = 10;
const MAX_INTERVAL_MS: u64 = 60_000;

pub struct StatsService {
    core: ServiceCore,
    sample_interval_ms: u64,
    sampler: Option<Sampler>,
    latest_tick: Arc<Mutex<Option<Instant>>>,
    subscription: Option<Subscription>,
    published: u64,
}

impl Default for StatsService {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsService {
    pub fn new() -> Self {
        let mut core = ServiceCore::new(NAME).with_dependency(hearth_mod_clock::NAME);
        core.register_setting(
            "sample_interval_ms",
            |s: &StatsService| &s.sample_interval_ms,
            |s: &mut StatsService| &mut s.sample_interval_ms,
        );
        Self {
            core,
            sample_interval_ms: 1000,
            sampler: None,
            latest_tick: Arc::new(Mutex::new(None)),
            subscription: None,
            published: 0,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.sample_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Samples published so far.
    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.sampler.as_ref().map(Sampler::sample)
    }

    fn interval(&self) -> Result<Duration> {
        ensure!(
            (MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(&self.sample_interval_ms),
            "sample_interval_ms must be within {MIN_INTERVAL_MS}..={MAX_INTERVAL_MS}, got {}",
            self.sample_interval_ms
        );
        Ok(Duration::from_millis(self.sample_interval_ms))
    }

    fn telemetry(sample: &Sample, clock: Option<&ClockService>) -> Vec<Telemetry> {
        let int = |v: u64| TelemetryValue::Int(i64::try_from(v).unwrap_or(i64::MAX));
        let mut out = vec![
            Telemetry::new(NAME, "cpu", TelemetryValue::Float(f64::from(sample.cpu))),
            Telemetry::new(NAME, "mem_used", int(sample.mem_used)),
            Telemetry::new(NAME, "mem_total", int(sample.mem_total)),
        ];
        if let Some(rss) = sample.rss {
            out.push(Telemetry::new(NAME, "rss", int(rss)));
        }
        if let Some(clock) = clock {
            out.push(Telemetry::new(
                NAME,
                "ups",
                TelemetryValue::Float(clock.updates_per_second()),
            ));
        }
        out
    }
}

impl Service for StatsService {
    fn core(&self) -> &ServiceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ServiceCore {
        &mut self.core
    }

    fn init(&mut self, ctx: &Context<'_>) -> Result<()> {
        let interval = self.interval()?;
        self.sampler = Some(Sampler::new(interval));

        let latest = Arc::clone(&self.latest_tick);
        self.subscription = Some(ctx.bus().subscribe(move |tick: &FrameTick| {
            *latest.lock().unwrap_or_else(|e| e.into_inner()) = Some(tick.now);
        }));
        log_message!(
            logger: ctx.logger(),
            "stats: sampling every {}ms",
            self.sample_interval_ms
        );
        Ok(())
    }

    fn update(&mut self, ctx: &Context<'_>) -> Result<()> {
        let tick = self
            .latest_tick
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let (Some(now), Some(sampler)) = (tick, self.sampler.as_mut()) else {
            return Ok(());
        };
        if !sampler.maybe_refresh(now) {
            return Ok(());
        }

        for telemetry in Self::telemetry(sampler.sample(), ctx.service::<ClockService>()) {
            ctx.bus().broadcast(&telemetry);
        }
        self.published += 1;
        Ok(())
    }

    fn shutdown(&mut self, ctx: &Context<'_>) -> Result<()> {
        self.subscription = None;
        match self.latest() {
            Some(sample) if self.published > 0 => log_message!(
                logger: ctx.logger(),
                "stats: {} samples published; last cpu {:.1}%, memory {} of {}",
                self.published,
                sample.cpu,
                human_bytes(sample.mem_used),
                human_bytes(sample.mem_total)
            ),
            _ => log_message!(logger: ctx.logger(), "stats: no samples published"),
        }
        Ok(())
    }

    fn self_test(&mut self, ctx: &Context<'_>) -> Result<()> {
        let clock = ctx
            .service::<ClockService>()
            .context("clock service is not reachable")?;

        let mut scratch = Sampler::new(self.interval()?);
        scratch.refresh(Instant::now());
        ensure!(scratch.sample().mem_total > 0, "sysinfo reported no memory");

        let figures = Self::telemetry(scratch.sample(), Some(clock));
        ensure!(
            figures.iter().any(|t| t.key == "ups"),
            "clock rate missing from telemetry"
        );
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
