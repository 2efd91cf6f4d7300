//! Terminal input service.
//!
//! Drains pending crossterm key events every update, publishes each press as
//! a [`KeyInput`] message, and asks the orchestrator to stop when one of the
//! configured quit keys is pressed.

mod keys;

use std::any::Any;
use std::io::IsTerminal;
use std::time::Duration;

use anyhow::{ensure, Context as _, Result};
use crossterm::event::{self, Event, KeyEvent, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};

use hearth_core::{log_debug, log_message, log_warning, Context, Service, ServiceCore};

pub use keys::{describe, KeyBinding};

pub const NAME: &str = "input";

/// A key press, published on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInput {
    pub event: KeyEvent,
    /// Binding-style description, e.g. `ctrl+c`.
    pub label: String,
}

pub struct InputService {
    core: ServiceCore,
    quit_keys: Vec<String>,
    raw_mode: bool,
    bindings: Vec<KeyBinding>,
    interactive: bool,
    raw_enabled: bool,
    presses: u64,
}

impl Default for InputService {
    fn default() -> Self {
        Self::new()
    }
}

impl InputService {
    pub fn new() -> Self {
        let mut core = ServiceCore::new(NAME);
        core.register_setting(
            "quit_keys",
            |s: &InputService| &s.quit_keys,
            |s: &mut InputService| &mut s.quit_keys,
        );
        core.register_setting(
            "raw_mode",
            |s: &InputService| &s.raw_mode,
            |s: &mut InputService| &mut s.raw_mode,
        );
        Self {
            core,
            quit_keys: vec!["q".into(), "esc".into(), "ctrl+c".into()],
            raw_mode: true,
            bindings: Vec::new(),
            interactive: false,
            raw_enabled: false,
            presses: 0,
        }
    }

    pub fn with_quit_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.quit_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Key presses handled so far.
    pub fn presses(&self) -> u64 {
        self.presses
    }

    fn parse_bindings(&self) -> Result<Vec<KeyBinding>> {
        ensure!(!self.quit_keys.is_empty(), "quit_keys must not be empty");
        self.quit_keys
            .iter()
            .map(|spec| {
                spec.parse::<KeyBinding>()
                    .with_context(|| format!("invalid quit key {spec:?}"))
            })
            .collect()
    }

    /// Publish one key event and stop on a quit key. Releases and repeats
    /// are ignored.
    pub fn handle(&mut self, key: KeyEvent, ctx: &Context<'_>) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        self.presses += 1;
        let input = KeyInput {
            event: key,
            label: describe(&key),
        };
        log_debug!(logger: ctx.logger(), "input: key {}", input.label);
        ctx.bus().broadcast(&input);

        if self.bindings.iter().any(|b| b.matches(&key)) {
            log_message!(logger: ctx.logger(), "input: {} pressed, stopping", input.label);
            ctx.request_stop();
        }
    }
}

impl Service for InputService {
    fn core(&self) -> &ServiceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ServiceCore {
        &mut self.core
    }

    fn init(&mut self, ctx: &Context<'_>) -> Result<()> {
        self.bindings = self.parse_bindings()?;
        self.interactive = std::io::stdin().is_terminal();
        if !self.interactive {
            log_warning!(
                logger: ctx.logger(),
                "input: stdin is not a terminal; key input disabled"
            );
            return Ok(());
        }
        if self.raw_mode {
            enable_raw_mode().context("failed to enable raw mode")?;
            self.raw_enabled = true;
        }
        let quit: Vec<String> = self.bindings.iter().map(ToString::to_string).collect();
        log_message!(
            logger: ctx.logger(),
            "input: listening (quit on {})",
            quit.join(", ")
        );
        Ok(())
    }

    fn update(&mut self, ctx: &Context<'_>) -> Result<()> {
        if !self.interactive {
            return Ok(());
        }
        while event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                self.handle(key, ctx);
            }
        }
        Ok(())
    }

    fn shutdown(&mut self, ctx: &Context<'_>) -> Result<()> {
        if self.raw_enabled {
            disable_raw_mode().context("failed to restore terminal mode")?;
            self.raw_enabled = false;
        }
        log_debug!(logger: ctx.logger(), "input: {} key presses", self.presses);
        Ok(())
    }

    fn self_test(&mut self, _ctx: &Context<'_>) -> Result<()> {
        for binding in self.parse_bindings()? {
            ensure!(
                binding.matches(&binding.to_event()),
                "quit key {binding} does not match its own event"
            );
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
