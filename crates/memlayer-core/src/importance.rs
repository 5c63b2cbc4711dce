//! Importance scoring for stored messages.
//!
//! The score blends recency, a role weight, and a base explicit value. An
//! explicit override replaces the computed score entirely.

use crate::clock::days_between;
use crate::error::MemoryError;
use chrono::{DateTime, Utc};

/// Weights and constants used by [`ImportanceScorer`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImportanceWeights {
    pub recency: f32,
    pub role: f32,
    pub explicit: f32,
    /// Explicit component used when no override is supplied.
    pub base_explicit: f32,
    /// Recency is `exp(-age_days / recency_scale_days)`.
    pub recency_scale_days: f64,
}

impl Default for ImportanceWeights {
    fn default() -> Self {
        Self {
            recency: 0.4,
            role: 0.2,
            explicit: 0.4,
            base_explicit: 0.5,
            recency_scale_days: 5.0,
        }
    }
}

/// Weight assigned to a role name. Unknown roles fall back to the assistant weight.
pub fn role_weight(role: &str) -> f32 {
    match role.trim().to_ascii_lowercase().as_str() {
        "system" => 0.9,
        "user" => 0.7,
        "assistant" => 0.5,
        _ => 0.5,
    }
}

/// Pure importance scorer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportanceScorer {
    weights: ImportanceWeights,
}

impl ImportanceScorer {
    pub fn new(weights: ImportanceWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ImportanceWeights {
        &self.weights
    }

    /// Score a message in [0, 1].
    ///
    /// Returns `MemoryError::Validation` when the override is outside [0, 1]
    /// or when `created_at` is later than `now` and no override is given.
    pub fn score(
        &self,
        created_at: DateTime<Utc>,
        role: &str,
        explicit_override: Option<f32>,
        now: DateTime<Utc>,
    ) -> Result<f32, MemoryError> {
        if let Some(value) = explicit_override {
            return validate_override(value);
        }

        let age_days = days_between(created_at, now);
        if age_days < 0.0 {
            return Err(MemoryError::Validation(format!(
                "created_at {created_at} is after now {now}"
            )));
        }

        let scale = self.weights.recency_scale_days.max(f64::MIN_POSITIVE);
        let recency = (-age_days / scale).exp() as f32;
        let score = self.weights.recency * recency
            + self.weights.role * role_weight(role)
            + self.weights.explicit * self.weights.base_explicit;
        Ok(score.clamp(0.0, 1.0))
    }
}

/// Validate an explicit importance value.
pub fn validate_override(value: f32) -> Result<f32, MemoryError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(MemoryError::Validation(format!(
            "importance override must be within [0, 1], got {value}"
        )))
    }
}
