use serde::{Deserialize, Serialize};

use crate::types::PingStatistics;

/// Sample standard deviation (n - 1 denominator); 0 with fewer than two samples.
pub fn sample_stddev(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    var.sqrt()
}

/// Advisory jitter bands, for display only.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct JitterThresholds {
    /// Jitter strictly below this is excellent.
    pub excellent_below_ms: f64,
    /// Jitter up to and including this is good; above it is poor.
    pub good_up_to_ms: f64,
}

impl Default for JitterThresholds {
    fn default() -> Self {
        Self {
            excellent_below_ms: 2.0,
            good_up_to_ms: 5.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JitterQuality {
    Excellent,
    Good,
    Poor,
}

impl JitterThresholds {
    pub fn classify(&self, jitter_ms: f64) -> JitterQuality {
        if jitter_ms < self.excellent_below_ms {
            JitterQuality::Excellent
        } else if jitter_ms <= self.good_up_to_ms {
            JitterQuality::Good
        } else {
            JitterQuality::Poor
        }
    }
}

/// Ping statistics paired with their advisory jitter rating.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct LatencyReport {
    #[serde(flatten)]
    pub stats: PingStatistics,
    /// `None` when no replies arrived.
    pub jitter_quality: Option<JitterQuality>,
}

impl LatencyReport {
    pub fn from_stats(stats: &PingStatistics, thresholds: &JitterThresholds) -> Self {
        let jitter_quality = if stats.packets_received > 0 {
            Some(thresholds.classify(sample_stddev(&stats.individual_rtts)))
        } else {
            None
        };
        Self {
            stats: stats.clone(),
            jitter_quality,
        }
    }
}
