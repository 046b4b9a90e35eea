use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub const DEFAULT_LOW_THRESHOLD: f64 = 0.3;
pub const DEFAULT_HIGH_THRESHOLD: f64 = 0.6;
pub const DEFAULT_STREAK_PENALTY: f64 = 0.15;
pub const DEFAULT_STREAK_PENALTY_CAP: f64 = 0.45;
pub const DEFAULT_STREAK_REASON_MIN: usize = 2;
pub const DEFAULT_RECENCY_THRESHOLD_DAYS: i64 = 60;
pub const DEFAULT_RECENCY_PENALTY: f64 = 0.2;

/// Thresholds and per-factor weights of the risk heuristic.
///
/// Scores below `low_threshold` are `baixo`, scores at or above
/// `high_threshold` are `alto`, everything in between is `moderado`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub low_threshold: f64,
    pub high_threshold: f64,
    /// Added once per consecutive trailing cancellation.
    pub streak_penalty: f64,
    pub streak_penalty_cap: f64,
    /// Shortest streak that is reported as the reason for a classification.
    pub streak_reason_min: usize,
    pub recency_threshold_days: i64,
    /// Flat penalty once the gap since the last session exceeds the threshold.
    pub recency_penalty: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            low_threshold: DEFAULT_LOW_THRESHOLD,
            high_threshold: DEFAULT_HIGH_THRESHOLD,
            streak_penalty: DEFAULT_STREAK_PENALTY,
            streak_penalty_cap: DEFAULT_STREAK_PENALTY_CAP,
            streak_reason_min: DEFAULT_STREAK_REASON_MIN,
            recency_threshold_days: DEFAULT_RECENCY_THRESHOLD_DAYS,
            recency_penalty: DEFAULT_RECENCY_PENALTY,
        }
    }
}

impl RiskConfig {
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Loads the optional file, applies explicit threshold overrides, then
    /// validates the merged result.
    pub fn load(
        path: Option<&Path>,
        low_threshold: Option<f64>,
        high_threshold: Option<f64>,
    ) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_json_file(path)?,
            None => Self::default(),
        };
        if let Some(value) = low_threshold {
            config.low_threshold = value;
        }
        if let Some(value) = high_threshold {
            config.high_threshold = value;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !(0.0..=1.0).contains(&self.low_threshold)
            || !(0.0..=1.0).contains(&self.high_threshold)
            || self.low_threshold >= self.high_threshold
        {
            return Err(EngineError::InvalidConfig(format!(
                "thresholds must satisfy 0 <= low < high <= 1 (low {}, high {})",
                self.low_threshold, self.high_threshold
            )));
        }

        let penalties = [
            ("streak_penalty", self.streak_penalty),
            ("streak_penalty_cap", self.streak_penalty_cap),
            ("recency_penalty", self.recency_penalty),
        ];
        for (name, value) in penalties {
            if !value.is_finite() || value < 0.0 {
                return Err(EngineError::InvalidConfig(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }

        if self.recency_threshold_days < 0 {
            return Err(EngineError::InvalidConfig(format!(
                "recency_threshold_days must be non-negative, got {}",
                self.recency_threshold_days
            )));
        }

        Ok(())
    }
}
