use crate::config::ForecastConfig;
use crate::error::{Error, Result};
use crate::server::ServerId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

/// Observed connection count at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadSample {
    pub timestamp: DateTime<Utc>,
    pub active_connections: u64,
}

/// Predicted load `hour_offset` hours after the latest observed hour
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadPrediction {
    pub hour_offset: u32,
    /// Expected concurrent connections; may exceed capacity
    pub predicted_load: f64,
}

/// Load samples per server, pruned to the retention window
#[derive(Debug)]
pub struct LoadHistory {
    samples: Mutex<HashMap<ServerId, VecDeque<LoadSample>>>,
    retention: Duration,
}

impl LoadHistory {
    pub fn new(retention_hours: u32) -> Self {
        Self {
            samples: Mutex::new(HashMap::new()),
            retention: Duration::hours(i64::from(retention_hours)),
        }
    }

    pub fn record(&self, id: ServerId, sample: LoadSample) -> Result<()> {
        let mut samples = self
            .samples
            .lock()
            .map_err(|_| Error::Other("Failed to lock load history".to_string()))?;

        let series = samples.entry(id).or_default();
        series.push_back(sample);

        let cutoff = sample.timestamp - self.retention;
        while series.front().is_some_and(|s| s.timestamp < cutoff) {
            series.pop_front();
        }
        Ok(())
    }

    pub fn samples(&self, id: ServerId) -> Result<Vec<LoadSample>> {
        let samples = self
            .samples
            .lock()
            .map_err(|_| Error::Other("Failed to lock load history".to_string()))?;
        Ok(samples
            .get(&id)
            .map(|series| series.iter().copied().collect())
            .unwrap_or_default())
    }

    pub fn remove(&self, id: ServerId) -> Result<()> {
        let mut samples = self
            .samples
            .lock()
            .map_err(|_| Error::Other("Failed to lock load history".to_string()))?;
        samples.remove(&id);
        Ok(())
    }
}

/// Mean load per hour, ordered by hour; keys are hours since the epoch
pub fn hourly_means(samples: &[LoadSample]) -> BTreeMap<i64, f64> {
    let mut buckets: BTreeMap<i64, (f64, u32)> = BTreeMap::new();
    for sample in samples {
        let hour = sample.timestamp.timestamp().div_euclid(3600);
        let bucket = buckets.entry(hour).or_insert((0.0, 0));
        bucket.0 += sample.active_connections as f64;
        bucket.1 += 1;
    }
    buckets
        .into_iter()
        .map(|(hour, (sum, count))| (hour, sum / f64::from(count)))
        .collect()
}

/// Least-squares slope of `points`, 0 when undefined
fn slope(points: &[(f64, f64)]) -> f64 {
    let n = points.len() as f64;
    if points.len() < 2 {
        return 0.0;
    }
    let sum_x: f64 = points.iter().map(|(x, _)| x).sum();
    let sum_y: f64 = points.iter().map(|(_, y)| y).sum();
    let sum_xy: f64 = points.iter().map(|(x, y)| x * y).sum();
    let sum_xx: f64 = points.iter().map(|(x, _)| x * x).sum();

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() < f64::EPSILON {
        return 0.0;
    }
    (n * sum_xy - sum_x * sum_y) / denominator
}

/// Exponential moving average, seeded with the first value
fn ema(values: impl IntoIterator<Item = f64>, alpha: f64) -> Option<f64> {
    values.into_iter().fold(None, |level, value| match level {
        None => Some(value),
        Some(previous) => Some(alpha * value + (1.0 - alpha) * previous),
    })
}

/// Short-horizon load forecaster.
///
/// The level is an exponential moving average of the hourly means and the
/// trend a least-squares slope over them:
/// `predicted(h) = max(0, level + slope * h)`. Output is deterministic for a
/// given history and deliberately not capped at capacity.
#[derive(Debug, Clone)]
pub struct LoadForecaster {
    config: ForecastConfig,
}

impl LoadForecaster {
    pub fn new(config: ForecastConfig) -> Self {
        Self { config }
    }

    pub fn default_horizon(&self) -> u32 {
        self.config.default_horizon_hours
    }

    /// Checks a requested horizon against `1..=max_horizon_hours`
    pub fn validate_horizon(&self, horizon_hours: u32) -> Result<u32> {
        if horizon_hours == 0 || horizon_hours > self.config.max_horizon_hours {
            return Err(Error::validation(
                "horizon_hours",
                format!(
                    "must be between 1 and {}, got {}",
                    self.config.max_horizon_hours, horizon_hours
                ),
            ));
        }
        Ok(horizon_hours)
    }

    /// Predicts `horizon_hours` hourly points; empty when history is too short
    pub fn predict(&self, samples: &[LoadSample], horizon_hours: u32) -> Result<Vec<LoadPrediction>> {
        let horizon_hours = self.validate_horizon(horizon_hours)?;

        let means = hourly_means(samples);
        if means.len() < self.config.min_history_hours {
            return Ok(Vec::new());
        }

        let Some((&first_hour, _)) = means.first_key_value() else {
            return Ok(Vec::new());
        };
        let points: Vec<(f64, f64)> = means
            .iter()
            .map(|(&hour, &mean)| ((hour - first_hour) as f64, mean))
            .collect();

        let trend = slope(&points);
        let Some(level) = ema(points.iter().map(|(_, y)| *y), self.config.smoothing) else {
            return Ok(Vec::new());
        };

        Ok((1..=horizon_hours)
            .map(|hour_offset| LoadPrediction {
                hour_offset,
                predicted_load: (level + trend * f64::from(hour_offset)).max(0.0),
            })
            .collect())
    }
}
