use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use hearth_config::LoggingConfig;
use tracing_appender::rolling;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::apply_disabled_categories;

const LOG_FILE_PREFIX: &str = "hearth.log";
const LOG_RETENTION_DAYS: u64 = 7;

/// Return the directory for the rolling `tracing` log file.
///
/// Precedence: `HEARTH_LOG_DIR` env var > `configured` > platform default.
/// macOS: `~/Library/Logs/hearth/`
/// Linux: `$XDG_DATA_HOME/hearth/logs/` or `~/.local/share/hearth/logs/`
pub fn log_dir(configured: Option<&Path>) -> PathBuf {
    if let Ok(dir) = std::env::var("HEARTH_LOG_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(dir) = configured {
        return dir.to_path_buf();
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = dirs::home_dir() {
            return home.join("Library").join("Logs").join("hearth");
        }
    }

    #[cfg(not(target_os = "macos"))]
    {
        if let Some(data) = dirs::data_dir() {
            return data.join("hearth").join("logs");
        }
    }

    PathBuf::from("logs")
}

/// Remove rolled log files older than `max_age_days` from `log_path`.
///
/// Only files starting with the `hearth.log` prefix are considered, so a
/// shared directory is left alone.
fn cleanup_old_logs(log_path: &Path, max_age_days: u64) {
    let cutoff =
        std::time::SystemTime::now() - std::time::Duration::from_secs(max_age_days * 86400);
    if let Ok(entries) = std::fs::read_dir(log_path) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(LOG_FILE_PREFIX) {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                if let Ok(modified) = meta.modified() {
                    if modified < cutoff {
                        let _ = std::fs::remove_file(entry.path());
                    }
                }
            }
        }
    }
}

fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_env("HEARTH_LOG")
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(config.filter.as_deref().unwrap_or("info")))
}

/// Install the process `tracing` subscriber and apply category flags.
///
/// Filter: `HEARTH_LOG` > `RUST_LOG` > `logging.filter` > `info`.
/// File output: daily rotation in [`log_dir`], 7-day retention, plain text or
/// JSON lines per `logging.json`.
pub fn init(config: &LoggingConfig) -> Result<()> {
    apply_disabled_categories(&config.disabled_categories)?;

    let log_path = log_dir(config.dir.as_deref());
    if let Err(e) = std::fs::create_dir_all(&log_path) {
        eprintln!(
            "warning: failed to create log directory {:?}: {}",
            log_path, e
        );
    }

    cleanup_old_logs(&log_path, LOG_RETENTION_DAYS);

    let file_appender = rolling::daily(&log_path, LOG_FILE_PREFIX);
    let (plain_layer, json_layer) = if config.json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(file_appender)
            .with_target(true);
        (None, Some(layer))
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_ansi(false)
            .with_target(true);
        (Some(layer), None)
    };

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(plain_layer)
        .with(json_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    // Serialize env-mutating tests to avoid data races.
    static ENV_LOCK: StdMutex<()> = StdMutex::new(());

    #[test]
    fn log_dir_respects_env_override() {
        let _guard = ENV_LOCK.lock().unwrap();
        let original = std::env::var("HEARTH_LOG_DIR").ok();

        unsafe { std::env::set_var("HEARTH_LOG_DIR", "/tmp/hearth-test-logs") };
        assert_eq!(log_dir(Some(Path::new("ignored"))), PathBuf::from("/tmp/hearth-test-logs"));

        match original {
            Some(v) => unsafe { std::env::set_var("HEARTH_LOG_DIR", v) },
            None => unsafe { std::env::remove_var("HEARTH_LOG_DIR") },
        }
    }

    #[test]
    fn log_dir_prefers_configured_over_default() {
        let _guard = ENV_LOCK.lock().unwrap();
        let original = std::env::var("HEARTH_LOG_DIR").ok();

        unsafe { std::env::remove_var("HEARTH_LOG_DIR") };
        assert_eq!(log_dir(Some(Path::new("custom/logs"))), PathBuf::from("custom/logs"));
        assert!(log_dir(None).ends_with("logs") || log_dir(None).ends_with("hearth"));

        if let Some(v) = original {
            unsafe { std::env::set_var("HEARTH_LOG_DIR", v) };
        }
    }

    #[test]
    fn cleanup_old_logs_removes_stale_files() {
        let tmp = std::env::temp_dir().join(format!("hearth-test-cleanup-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&tmp);

        let log_a = tmp.join("hearth.log.2025-01-01");
        let log_b = tmp.join("hearth.log.2025-01-02");
        let other = tmp.join("other.txt");
        std::fs::write(&log_a, "a").unwrap();
        std::fs::write(&log_b, "b").unwrap();
        std::fs::write(&other, "c").unwrap();

        // max_age_days=0 means cutoff is "now", so all matching files get cleaned
        cleanup_old_logs(&tmp, 0);
        assert!(!log_a.exists(), "rolled log file should be deleted");
        assert!(!log_b.exists(), "rolled log file should be deleted");
        assert!(other.exists(), "unrelated file should be preserved");

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
