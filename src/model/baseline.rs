//! Rolling duration baselines and anomaly scoring.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
    pub workflow_name: String,
    pub task_id: Option<String>,
    pub mean: f64,
    pub stddev: f64,
    pub sample_count: u64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub workflow_name: String,
    pub task_id: Option<String>,
    pub execution_id: Uuid,
    pub severity: Severity,
    pub z_score: f64,
    pub actual: f64,
    pub expected: f64,
    pub occurred_at: DateTime<Utc>,
}

/// `{Low: 2, Medium: 3, High: 4, Critical: 5}` per the spec's default
/// thresholds, expressed as the minimum `|z|` for each severity.
#[derive(Debug, Clone, Copy)]
pub struct AnomalyThresholds {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        Self {
            low: 2.0,
            medium: 3.0,
            high: 4.0,
            critical: 5.0,
        }
    }
}

impl AnomalyThresholds {
    /// Map `|z|` to the highest severity it clears, or `None` if it is
    /// below `low`.
    #[must_use]
    pub fn classify(&self, abs_z: f64) -> Option<Severity> {
        if abs_z >= self.critical {
            Some(Severity::Critical)
        } else if abs_z >= self.high {
            Some(Severity::High)
        } else if abs_z >= self.medium {
            Some(Severity::Medium)
        } else if abs_z >= self.low {
            Some(Severity::Low)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_threshold() {
        let t = AnomalyThresholds::default();
        assert_eq!(t.classify(1.0), None);
        assert_eq!(t.classify(2.0), Some(Severity::Low));
        assert_eq!(t.classify(3.5), Some(Severity::Medium));
        assert_eq!(t.classify(4.2), Some(Severity::High));
        assert_eq!(t.classify(5.0), Some(Severity::Critical));
    }
}
