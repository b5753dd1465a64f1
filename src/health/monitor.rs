//! Health counters and the periodic monitor loop.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// Error rate (percent) above which a check warns.
const WARN_ERROR_RATE: f64 = 10.0;

/// Error rate (percent) above which a check fails.
const FAIL_ERROR_RATE: f64 = 20.0;

/// Shortest period the monitor loop accepts.
const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Overall health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Healthy => "✅ healthy",
            Self::Degraded => "⚠️ degraded",
            Self::Unhealthy => "❌ unhealthy",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

/// Result of one named check.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthCheck {
    pub name: &'static str,
    pub status: CheckStatus,
    pub message: Option<String>,
}

/// Snapshot of counters plus the derived checks.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub uptime: TimeDelta,
    pub messages_total: u64,
    pub message_errors: u64,
    pub commands_total: u64,
    pub command_errors: u64,
    pub checks: Vec<HealthCheck>,
}

impl HealthReport {
    /// Checks that did not pass.
    pub fn problems(&self) -> impl Iterator<Item = &HealthCheck> {
        self.checks
            .iter()
            .filter(|check| check.status != CheckStatus::Pass)
    }
}

/// Messages that can be sent to a running monitor loop.
#[derive(Debug, Clone)]
pub enum HealthMessage {
    /// Run a check immediately.
    CheckNow,
    /// Stop the monitor.
    Shutdown,
}

/// Shared health counters.
#[derive(Debug)]
pub struct HealthMonitor {
    started_at: DateTime<Utc>,
    messages_total: AtomicU64,
    message_errors: AtomicU64,
    commands_total: AtomicU64,
    command_errors: AtomicU64,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            messages_total: AtomicU64::new(0),
            message_errors: AtomicU64::new(0),
            commands_total: AtomicU64::new(0),
            command_errors: AtomicU64::new(0),
        }
    }

    pub fn record_message(&self, success: bool) {
        self.messages_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.message_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_command(&self, success: bool) {
        self.commands_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.command_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn report(&self) -> HealthReport {
        let messages_total = self.messages_total.load(Ordering::Relaxed);
        let message_errors = self.message_errors.load(Ordering::Relaxed);
        let commands_total = self.commands_total.load(Ordering::Relaxed);
        let command_errors = self.command_errors.load(Ordering::Relaxed);

        let checks = vec![
            error_rate_check("message_errors", "Message", message_errors, messages_total),
            error_rate_check("command_errors", "Command", command_errors, commands_total),
        ];

        let status = if checks.iter().any(|c| c.status == CheckStatus::Fail) {
            HealthStatus::Unhealthy
        } else if checks.iter().any(|c| c.status == CheckStatus::Warn) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthReport {
            status,
            uptime: Utc::now() - self.started_at,
            messages_total,
            message_errors,
            commands_total,
            command_errors,
            checks,
        }
    }

    /// Human-readable multi-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let report = self.report();
        let mut text = format!(
            "📊 Status: {}\n⏱️ Uptime: {}\n📩 Messages: {} ({} errors)\n⚡ Commands: {} ({} errors)",
            report.status,
            format_uptime(report.uptime),
            report.messages_total,
            report.message_errors,
            report.commands_total,
            report.command_errors,
        );
        for check in report.problems() {
            if let Some(message) = &check.message {
                text.push_str("\n• ");
                text.push_str(message);
            }
        }
        text
    }

    /// Runs the monitor loop until a shutdown message arrives or the channel
    /// closes.
    pub async fn run(&self, period: Duration, mut rx: mpsc::Receiver<HealthMessage>) {
        if period < MIN_PERIOD {
            warn!("Health check period {:?} too short, using {:?}", period, MIN_PERIOD);
        }
        let period = period.max(MIN_PERIOD);
        info!("Health monitor started (every {:?})", period);

        let mut ticker = interval(period);
        // First tick completes immediately; nothing to report yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check();
                }
                msg = rx.recv() => {
                    match msg {
                        Some(HealthMessage::CheckNow) => {
                            debug!("Received health check request");
                            self.check();
                        }
                        Some(HealthMessage::Shutdown) | None => {
                            info!("Health monitor shutting down");
                            break;
                        }
                    }
                }
            }
        }
    }

    fn check(&self) -> HealthStatus {
        let report = self.report();
        let problems: Vec<String> = report
            .problems()
            .filter_map(|check| check.message.clone())
            .collect();

        match report.status {
            HealthStatus::Unhealthy => error!("Health check failed: {}", problems.join("; ")),
            HealthStatus::Degraded => warn!("Health check warning: {}", problems.join("; ")),
            HealthStatus::Healthy => debug!(
                "Health check passed ({} messages, {} commands)",
                report.messages_total, report.commands_total
            ),
        }
        report.status
    }
}

#[allow(clippy::cast_precision_loss)]
fn error_rate_check(name: &'static str, label: &str, errors: u64, total: u64) -> HealthCheck {
    let rate = if total == 0 {
        0.0
    } else {
        errors as f64 / total as f64 * 100.0
    };

    let (status, message) = if rate > FAIL_ERROR_RATE {
        (
            CheckStatus::Fail,
            Some(format!("{label} error rate too high: {rate:.1}%")),
        )
    } else if rate > WARN_ERROR_RATE {
        (
            CheckStatus::Warn,
            Some(format!("{label} error rate elevated: {rate:.1}%")),
        )
    } else {
        (CheckStatus::Pass, None)
    };

    HealthCheck {
        name,
        status,
        message,
    }
}

/// Formats a duration as `1d 2h 3m 4s`, omitting leading zero units.
#[must_use]
pub fn format_uptime(uptime: TimeDelta) -> String {
    let total = uptime.num_seconds().max(0);
    let (days, hours, minutes, seconds) = (
        total / 86_400,
        total % 86_400 / 3_600,
        total % 3_600 / 60,
        total % 60,
    );

    if days > 0 {
        format!("{days}d {hours}h {minutes}m {seconds}s")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
