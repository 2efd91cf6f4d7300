//! Frame clock service.
//!
//! Publishes one [`FrameTick`] per orchestrator update, carrying the frame
//! number and the time elapsed since the previous frame scaled by the
//! `time_scale` setting.

mod rate;

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, ensure, Result};

use hearth_core::bus::Bus;
use hearth_core::event::FrameTick;
use hearth_core::{log_debug, log_message, Context, Service, ServiceCore};

pub use rate::RateMeter;

pub const NAME: &str = "clock";

/// Upper bound for the `time_scale` setting.
pub const MAX_TIME_SCALE: f64 = 100.0;

pub struct ClockService {
    core: ServiceCore,
    time_scale: f64,
    started: Option<Instant>,
    last: Option<Instant>,
    elapsed: Duration,
    frame: u64,
    rate: RateMeter,
}

impl Default for ClockService {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockService {
    pub fn new() -> Self {
        let mut core = ServiceCore::new(NAME);
        core.register_setting(
            "time_scale",
            |s: &ClockService| &s.time_scale,
            |s: &mut ClockService| &mut s.time_scale,
        );
        Self {
            core,
            time_scale: 1.0,
            started: None,
            last: None,
            elapsed: Duration::ZERO,
            frame: 0,
            rate: RateMeter::default(),
        }
    }

    pub fn with_time_scale(mut self, time_scale: f64) -> Self {
        self.time_scale = time_scale;
        self
    }

    pub fn time_scale(&self) -> f64 {
        self.time_scale
    }

    /// Frames produced so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Scaled time since the clock started.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Measured update rate over the last second.
    pub fn updates_per_second(&self) -> f64 {
        self.rate.per_second()
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.time_scale.is_finite() && (0.0..=MAX_TIME_SCALE).contains(&self.time_scale),
            "time_scale must be within 0..={MAX_TIME_SCALE}, got {}",
            self.time_scale
        );
        Ok(())
    }

    fn start(&mut self, now: Instant) {
        self.started = Some(now);
        self.last = Some(now);
        self.elapsed = Duration::ZERO;
        self.frame = 0;
        self.rate.reset();
    }

    /// Advance to `now` and describe the new frame.
    pub fn advance(&mut self, now: Instant) -> FrameTick {
        if self.started.is_none() {
            self.start(now);
        }
        let raw = self
            .last
            .map_or(Duration::ZERO, |last| now.saturating_duration_since(last));
        let delta = Duration::try_from_secs_f64(raw.as_secs_f64() * self.time_scale).unwrap_or(raw);

        self.last = Some(now);
        self.elapsed += delta;
        self.frame += 1;
        self.rate.record(now);

        FrameTick {
            frame: self.frame,
            now,
            delta,
            elapsed: self.elapsed,
        }
    }
}

impl Service for ClockService {
    fn core(&self) -> &ServiceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ServiceCore {
        &mut self.core
    }

    fn init(&mut self, ctx: &Context<'_>) -> Result<()> {
        self.validate()?;
        self.start(Instant::now());
        log_message!(
            logger: ctx.logger(),
            "clock: started (time scale {})",
            self.time_scale
        );
        Ok(())
    }

    fn update(&mut self, ctx: &Context<'_>) -> Result<()> {
        let tick = self.advance(Instant::now());
        ctx.bus().broadcast(&tick);
        Ok(())
    }

    fn shutdown(&mut self, ctx: &Context<'_>) -> Result<()> {
        log_message!(
            logger: ctx.logger(),
            "clock: stopped after {} frames ({:.1} updates/s)",
            self.frame,
            self.updates_per_second()
        );
        Ok(())
    }

    fn self_test(&mut self, ctx: &Context<'_>) -> Result<()> {
        self.validate()?;

        // Drive a scratch clock on a private bus so the real one is untouched.
        let bus = Bus::new();
        let seen = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&seen);
        let _sub = bus.subscribe(move |tick: &FrameTick| {
            counter.store(tick.frame, Ordering::SeqCst);
        });

        let mut scratch = ClockService::new().with_time_scale(self.time_scale);
        let t0 = Instant::now();
        let mut previous = Duration::ZERO;
        for i in 1..=3u64 {
            let tick = scratch.advance(t0 + Duration::from_millis(i * 10));
            bus.broadcast(&tick);
            if tick.elapsed < previous {
                bail!("elapsed time went backwards at frame {}", tick.frame);
            }
            previous = tick.elapsed;
        }
        ensure!(
            seen.load(Ordering::SeqCst) == 3,
            "expected 3 frame ticks on the bus, saw {}",
            seen.load(Ordering::SeqCst)
        );
        log_debug!(logger: ctx.logger(), "clock: self-test advanced 3 frames");
        Ok(())
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
    use hearth_core::Detached;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn frames_count_and_accumulate() {
        let mut clock = ClockService::new();
        let t0 = Instant::now();
        let first = clock.advance(t0);
        assert_eq!(first.frame, 1);
        assert_eq!(first.delta, Duration::ZERO);

        let second = clock.advance(t0 + Duration::from_millis(16));
        assert_eq!(second.frame, 2);
        assert_eq!(second.delta, Duration::from_millis(16));
        assert_eq!(clock.elapsed(), Duration::from_millis(16));
    }

    #[test]
    fn time_scale_stretches_delta() {
        let mut clock = ClockService::new().with_time_scale(2.0);
        let t0 = Instant::now();
        clock.advance(t0);
        let tick = clock.advance(t0 + Duration::from_millis(10));
        assert_eq!(tick.delta, Duration::from_millis(20));

        let mut paused = ClockService::new().with_time_scale(0.0);
        paused.advance(t0);
        assert_eq!(paused.advance(t0 + Duration::from_secs(1)).elapsed, Duration::ZERO);
    }

    #[test]
    fn init_rejects_bad_time_scale() {
        let detached = Detached::new();
        let mut clock = ClockService::new().with_time_scale(-1.0);
        assert!(clock.init(&detached.context()).is_err());

        let mut clock = ClockService::new().with_time_scale(f64::NAN);
        assert!(clock.init(&detached.context()).is_err());
    }

    #[test]
    fn update_broadcasts_frame_tick() {
        let detached = Detached::new();
        let ctx = detached.context();
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&frames);
        let _sub = detached
            .bus
            .subscribe(move |tick: &FrameTick| sink.lock().unwrap().push(tick.frame));

        let mut clock = ClockService::new();
        clock.init(&ctx).unwrap();
        clock.update(&ctx).unwrap();
        clock.update(&ctx).unwrap();
        assert_eq!(*frames.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn self_test_passes_and_leaves_state_alone() {
        let detached = Detached::new();
        let mut clock = ClockService::new();
        clock.self_test(&detached.context()).unwrap();
        assert_eq!(clock.frame(), 0);
    }

    #[test]
    fn time_scale_is_a_setting() {
        let mut clock = ClockService::new();
        let settings = clock.core().settings().clone();
        let errors = settings.load(clock.as_any_mut(), &json!({"time_scale": 0.5}));
        assert!(errors.is_empty());
        assert_eq!(clock.time_scale(), 0.5);
        assert_eq!(settings.save(clock.as_any()).unwrap(), json!({"time_scale": 0.5}));
    }
}
