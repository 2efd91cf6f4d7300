mod demo;

use std::env;
use std::io::IsTerminal;
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};

use hearth_config::{LoggingConfig, RuntimeConfig};
use hearth_core::logging::{self, ConsoleSink, FileSink, TracingSink};
use hearth_core::{Orchestrator, OrchestratorOptions};
use hearth_mod_clock::ClockService;
use hearth_mod_input::InputService;
use hearth_mod_stats::StatsService;

use demo::DemoApp;

/// Set to `1` or `true` to run service self-tests instead of the demo.
const HEADLESS_ENV: &str = "HEARTH_HEADLESS";

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn install_sinks(config: &LoggingConfig) -> Result<()> {
    let logger = logging::global();
    logger.add(Arc::new(TracingSink));
    if config.console {
        logger.add(Arc::new(ConsoleSink::new(std::io::stderr().is_terminal())));
    }
    if let Some(path) = &config.file {
        let sink = FileSink::create(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        logger.add(Arc::new(sink));
    }
    Ok(())
}

fn main() -> Result<()> {
    let config = RuntimeConfig::load()?;
    logging::init(&config.logging)?;
    install_sinks(&config.logging)?;
    tracing::info!("Hearth starting up");

    let headless = config.runtime.headless || env_flag(HEADLESS_ENV);
    let mut orchestrator = Orchestrator::new(OrchestratorOptions::from(&config.runtime));
    orchestrator.enable(ClockService::new())?;
    orchestrator.enable(StatsService::new())?;
    orchestrator.enable(InputService::new())?;
    if headless {
        tracing::info!("headless: running service self-tests");
    } else {
        orchestrator.set_application(DemoApp::new())?;
    }

    let report = orchestrator.run()?;
    tracing::info!(
        ticks = report.ticks,
        passes = report.passes,
        "Hearth stopped"
    );

    if report.application_failed {
        bail!("application failed to start");
    }
    if !report.self_test_failures.is_empty() {
        bail!(
            "{} self-test(s) failed: {}",
            report.self_test_failures.len(),
            report.self_test_failures.join("; ")
        );
    }
    Ok(())
}
