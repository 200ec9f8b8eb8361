use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

const ALPHA: f64 = 0.1; // EWMA smoothing factor

/// Measured (not declared) behaviour of one pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PipelineTelemetry {
    pub avg_latency_ms: f64,
    pub error_rate: f64,
    pub last_latency_ms: f64,
    pub samples: u64,
    pub failures: u64,
}

impl PipelineTelemetry {
    fn record(&mut self, latency_ms: f64, success: bool) {
        let error = if success { 0.0 } else { 1.0 };
        if self.samples == 0 {
            self.avg_latency_ms = latency_ms;
            self.error_rate = error;
        } else {
            self.avg_latency_ms = update_ewma(self.avg_latency_ms, latency_ms);
            self.error_rate = update_ewma(self.error_rate, error);
        }
        self.last_latency_ms = latency_ms;
        self.samples += 1;
        if !success {
            self.failures += 1;
        }
    }
}

fn update_ewma(current: f64, new_value: f64) -> f64 {
    current * (1.0 - ALPHA) + new_value * ALPHA
}

pub type TelemetrySnapshot = HashMap<String, PipelineTelemetry>;

#[derive(Debug, Default)]
pub struct TelemetryStore {
    entries: Mutex<TelemetrySnapshot>,
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, pipeline: &str, duration: Duration, success: bool) {
        let latency_ms = duration.as_micros() as f64 / 1_000.0;
        self.entries
            .lock()
            .entry(pipeline.to_string())
            .or_default()
            .record(latency_ms, success);
    }

    pub fn get(&self, pipeline: &str) -> Option<PipelineTelemetry> {
        self.entries.lock().get(pipeline).copied()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.entries.lock().clone()
    }

    pub fn remove(&self, pipeline: &str) {
        self.entries.lock().remove(pipeline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_seeds_the_average() {
        let store = TelemetryStore::new();
        store.record("gaze", Duration::from_millis(40), true);
        let telemetry = store.get("gaze").unwrap();
        assert_eq!(telemetry.avg_latency_ms, 40.0);
        assert_eq!(telemetry.error_rate, 0.0);
        assert_eq!(telemetry.samples, 1);
    }

    #[test]
    fn failures_raise_error_rate_gradually() {
        let store = TelemetryStore::new();
        store.record("gaze", Duration::from_millis(10), true);
        store.record("gaze", Duration::from_millis(110), false);
        let telemetry = store.get("gaze").unwrap();
        assert!((telemetry.avg_latency_ms - 20.0).abs() < 1e-9);
        assert!((telemetry.error_rate - 0.1).abs() < 1e-9);
        assert_eq!(telemetry.failures, 1);
        assert_eq!(telemetry.last_latency_ms, 110.0);
    }
}
