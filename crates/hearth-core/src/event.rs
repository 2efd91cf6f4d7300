//! Message types shared across services on the [`Bus`](crate::bus::Bus).

use std::fmt;
use std::time::{Duration, Instant};

/// Published once per frame by the clock service.
#[derive(Debug, Clone, Copy)]
pub struct FrameTick {
    pub frame: u64,
    pub now: Instant,
    /// Scaled time since the previous frame.
    pub delta: Duration,
    /// Scaled time since the clock was initialized.
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryValue {
    Float(f64),
    Int(i64),
    Text(String),
}

impl fmt::Display for TelemetryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryValue::Float(v) => write!(f, "{v:.2}"),
            TelemetryValue::Int(v) => write!(f, "{v}"),
            TelemetryValue::Text(v) => f.write_str(v),
        }
    }
}

/// A named measurement reported by a service.
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    pub source: String,
    pub key: String,
    pub value: TelemetryValue,
}

impl Telemetry {
    pub fn new(source: impl Into<String>, key: impl Into<String>, value: TelemetryValue) -> Self {
        Self {
            source: source.into(),
            key: key.into(),
            value,
        }
    }
}
