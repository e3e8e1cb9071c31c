//! Analysis run configuration.

use crate::error::{AnalysisError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// What to do when a test fails on the unmutated program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselinePolicy {
    /// Keep the failing result as the baseline and compare mutants against it.
    #[default]
    Compare,
    /// Abort the run: a test that fails without any mutant cannot be trusted
    /// to tell mutants apart.
    Reject,
}

/// Configuration for one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Multiplier applied to the baseline's running time to bound a mutant run.
    pub timeout_factor: u32,
    /// Lower bound on a mutant run's time budget.
    #[serde(with = "millis")]
    pub timeout_floor: Duration,
    /// Upper bound on any run, baseline included.
    #[serde(with = "millis")]
    pub timeout_ceiling: Duration,
    /// Number of tests analysed concurrently.
    pub jobs: usize,
    pub baseline_policy: BaselinePolicy,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            timeout_factor: 8,
            timeout_floor: Duration::from_secs(1),
            timeout_ceiling: Duration::from_secs(60),
            jobs: 1,
            baseline_policy: BaselinePolicy::Compare,
        }
    }
}

impl AnalysisConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AnalysisConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn with_timeout_factor(mut self, factor: u32) -> Self {
        self.timeout_factor = factor;
        self
    }

    pub fn with_timeout_floor(mut self, floor: Duration) -> Self {
        self.timeout_floor = floor;
        self
    }

    pub fn with_timeout_ceiling(mut self, ceiling: Duration) -> Self {
        self.timeout_ceiling = ceiling;
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_baseline_policy(mut self, policy: BaselinePolicy) -> Self {
        self.baseline_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_factor == 0 {
            return Err(AnalysisError::InvalidInput(
                "timeout_factor must be at least 1".to_string(),
            ));
        }
        if self.timeout_ceiling.is_zero() {
            return Err(AnalysisError::InvalidInput(
                "timeout_ceiling must be positive".to_string(),
            ));
        }
        if self.timeout_floor > self.timeout_ceiling {
            return Err(AnalysisError::InvalidInput(format!(
                "timeout_floor ({:?}) exceeds timeout_ceiling ({:?})",
                self.timeout_floor, self.timeout_ceiling
            )));
        }
        if self.jobs == 0 {
            return Err(AnalysisError::InvalidInput(
                "jobs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Time budget for one mutant run of a test whose baseline took `nominal`.
    pub fn mutant_timeout(&self, nominal: Duration) -> Duration {
        nominal
            .saturating_mul(self.timeout_factor)
            .clamp(self.timeout_floor, self.timeout_ceiling)
    }

    pub fn baseline_timeout(&self) -> Duration {
        self.timeout_ceiling
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
