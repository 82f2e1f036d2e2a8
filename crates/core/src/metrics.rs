//! Per-device connection metrics.

use serde::Serialize;
use std::time::{Duration, Instant};

/// Smoothing factor for the response-time moving average.
const EMA_ALPHA: f64 = 0.1;

#[derive(Debug, Clone, Default)]
pub struct ConnectionMetrics {
    pub commands_sent: u64,
    pub commands_succeeded: u64,
    /// Exponential moving average of transfer round-trips.
    pub avg_response_time: Option<Duration>,
    pub consecutive_errors: u32,
    pub total_errors: u64,
    pub reconnect_count: u32,
    pub connected_since: Option<Instant>,
    pub last_error: Option<String>,
    pub connection_method: Option<String>,
}

impl ConnectionMetrics {
    fn record_response_time(&mut self, elapsed: Duration) {
        self.avg_response_time = Some(match self.avg_response_time {
            None => elapsed,
            Some(avg) => avg.mul_f64(1.0 - EMA_ALPHA) + elapsed.mul_f64(EMA_ALPHA),
        });
    }

    /// Record the outcome of one dispatched command.
    pub fn record_command(&mut self, success: bool, elapsed: Duration) {
        self.commands_sent += 1;
        self.record_response_time(elapsed);
        if success {
            self.commands_succeeded += 1;
            self.consecutive_errors = 0;
        }
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.consecutive_errors += 1;
        self.total_errors += 1;
        self.last_error = Some(message.into());
    }

    /// Record a health probe. Only the response time is tracked.
    pub fn record_health(&mut self, elapsed: Duration) {
        self.record_response_time(elapsed);
    }

    pub fn mark_connected(&mut self, method: &str) {
        self.connected_since = Some(Instant::now());
        self.connection_method = Some(method.to_string());
        self.consecutive_errors = 0;
    }

    pub fn mark_disconnected(&mut self) {
        self.connected_since = None;
        self.connection_method = None;
    }

    /// Fraction of commands that succeeded; 1.0 before any command.
    pub fn success_rate(&self) -> f64 {
        if self.commands_sent == 0 {
            1.0
        } else {
            self.commands_succeeded as f64 / self.commands_sent as f64
        }
    }

    pub fn uptime(&self) -> Duration {
        self.connected_since
            .map(|since| since.elapsed())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commands_sent: self.commands_sent,
            commands_succeeded: self.commands_succeeded,
            success_rate: self.success_rate(),
            avg_response_ms: self
                .avg_response_time
                .map(|d| d.as_secs_f64() * 1000.0),
            consecutive_errors: self.consecutive_errors,
            total_errors: self.total_errors,
            reconnect_count: self.reconnect_count,
            uptime_secs: self.uptime().as_secs(),
            last_error: self.last_error.clone(),
            connection_method: self.connection_method.clone(),
        }
    }
}

/// Point-in-time copy of [`ConnectionMetrics`] for display or JSON output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub commands_sent: u64,
    pub commands_succeeded: u64,
    pub success_rate: f64,
    pub avg_response_ms: Option<f64>,
    pub consecutive_errors: u32,
    pub total_errors: u64,
    pub reconnect_count: u32,
    pub uptime_secs: u64,
    pub last_error: Option<String>,
    pub connection_method: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_sets_average() {
        let mut m = ConnectionMetrics::default();
        m.record_command(true, Duration::from_millis(10));
        assert_eq!(m.avg_response_time, Some(Duration::from_millis(10)));
    }

    #[test]
    fn average_is_exponentially_smoothed() {
        let mut m = ConnectionMetrics::default();
        m.record_command(true, Duration::from_millis(100));
        m.record_command(true, Duration::from_millis(200));
        // 0.9 * 100 + 0.1 * 200
        let avg = m.avg_response_time.unwrap().as_secs_f64() * 1000.0;
        assert!((avg - 110.0).abs() < 0.01, "{avg}");
    }

    #[test]
    fn success_rate_and_error_counters() {
        let mut m = ConnectionMetrics::default();
        assert_eq!(m.success_rate(), 1.0);
        m.record_command(true, Duration::ZERO);
        m.record_command(false, Duration::ZERO);
        m.record_error("pipe");
        m.record_command(false, Duration::ZERO);
        m.record_error("pipe");
        assert_eq!(m.consecutive_errors, 2);
        assert!((m.success_rate() - 1.0 / 3.0).abs() < f64::EPSILON);

        m.record_command(true, Duration::ZERO);
        assert_eq!(m.consecutive_errors, 0);
        assert_eq!(m.total_errors, 2);
        assert_eq!(m.last_error.as_deref(), Some("pipe"));
    }

    #[test]
    fn snapshot_serializes() {
        let mut m = ConnectionMetrics::default();
        m.mark_connected("HID Standard");
        let json = serde_json::to_value(m.snapshot()).unwrap();
        assert_eq!(json["connection_method"], "HID Standard");
        assert_eq!(json["commands_sent"], 0);
        m.mark_disconnected();
        assert_eq!(m.uptime(), Duration::ZERO);
    }
}
