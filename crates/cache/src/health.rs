//! Cache health derivation from stats.

use serde::Serialize;

use crate::tier::TierStats;

/// Coarse health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

/// Thresholds that turn stats into issues.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthThresholds {
    /// Below this hit rate the cache is not paying for itself.
    pub min_hit_rate: f64,
    /// Above this size/capacity ratio the cache is about to thrash.
    pub max_utilization: f64,
    /// Estimated memory ceiling in bytes.
    pub memory_ceiling_bytes: usize,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            min_hit_rate: 0.3,
            max_utilization: 0.9,
            memory_ceiling_bytes: 50 * 1024 * 1024,
        }
    }
}

/// Health report with human-readable issues and matching recommendations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheHealth {
    pub status: HealthStatus,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

impl CacheHealth {
    /// Evaluate the aggregate stats against the thresholds.
    ///
    /// One issue is a warning; several at once are critical. The hit-rate check
    /// only applies once the cache has served at least one lookup.
    pub fn evaluate(overall: &TierStats, thresholds: &HealthThresholds) -> Self {
        let mut issues = Vec::new();
        let mut recommendations = Vec::new();

        if overall.lookups() > 0 && overall.hit_rate < thresholds.min_hit_rate {
            issues.push(format!(
                "Low cache hit rate ({:.1}%)",
                overall.hit_rate * 100.0
            ));
            recommendations.push("Consider increasing cache TTL or size".to_string());
        }

        if overall.estimated_memory_bytes > thresholds.memory_ceiling_bytes {
            issues.push(format!(
                "High memory usage ({} bytes estimated)",
                overall.estimated_memory_bytes
            ));
            recommendations.push("Consider reducing cache sizes".to_string());
        }

        let utilization = if overall.max_size == 0 {
            0.0
        } else {
            overall.size as f64 / overall.max_size as f64
        };
        if utilization > thresholds.max_utilization {
            issues.push(format!("Cache near capacity ({:.0}% full)", utilization * 100.0));
            recommendations
                .push("Consider increasing cache size or reducing TTL".to_string());
        }

        let status = match issues.len() {
            0 => HealthStatus::Healthy,
            1 => HealthStatus::Warning,
            _ => HealthStatus::Critical,
        };

        Self {
            status,
            issues,
            recommendations,
        }
    }
}
