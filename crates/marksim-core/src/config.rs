//! Engine configuration.
//!
//! Defaults are compiled in; [`EngineConfig::from_env`] overrides them from
//! `MARKSIM_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::domain::{Result, SimError};

/// Default worker-pool size per job.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
/// Weight of the pipeline's own scores in the final blend.
pub const DEFAULT_PIPELINE_WEIGHT: f64 = 0.5;
/// Final conflict score at or above which a candidate counts as high risk.
pub const DEFAULT_HIGH_RISK_THRESHOLD: f64 = 70.0;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Maximum candidate pipelines running at once for one job.
    pub max_concurrency: usize,
    /// `final = w * pipeline + (1 - w) * heuristic`.
    pub pipeline_weight: f64,
    pub high_risk_threshold: f64,
    /// Upper bound on one reasoning-service call.
    pub stage_timeout: Duration,
    /// Upper bound on one document fetch.
    pub fetch_timeout: Duration,
    /// Where per-candidate debug transcripts are written, if anywhere.
    pub artifacts_dir: Option<PathBuf>,
    /// How long finished jobs stay queryable.
    pub retention: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            pipeline_weight: DEFAULT_PIPELINE_WEIGHT,
            high_risk_threshold: DEFAULT_HIGH_RISK_THRESHOLD,
            stage_timeout: Duration::from_secs(120),
            fetch_timeout: Duration::from_secs(30),
            artifacts_dir: None,
            retention: Duration::from_secs(60 * 60),
        }
    }
}

impl EngineConfig {
    /// Build a config from the environment, falling back to defaults for
    /// unset or unparsable variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrency: env_parse("MARKSIM_MAX_CONCURRENCY", defaults.max_concurrency),
            pipeline_weight: env_parse("MARKSIM_PIPELINE_WEIGHT", defaults.pipeline_weight),
            high_risk_threshold: env_parse(
                "MARKSIM_HIGH_RISK_THRESHOLD",
                defaults.high_risk_threshold,
            ),
            stage_timeout: Duration::from_secs(env_parse(
                "MARKSIM_STAGE_TIMEOUT_SECS",
                defaults.stage_timeout.as_secs(),
            )),
            fetch_timeout: Duration::from_secs(env_parse(
                "MARKSIM_FETCH_TIMEOUT_SECS",
                defaults.fetch_timeout.as_secs(),
            )),
            artifacts_dir: std::env::var_os("MARKSIM_ARTIFACTS_DIR").map(PathBuf::from),
            retention: Duration::from_secs(env_parse(
                "MARKSIM_RETENTION_SECS",
                defaults.retention.as_secs(),
            )),
        }
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn with_artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts_dir = Some(dir.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(SimError::InvalidConfig(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.pipeline_weight) {
            return Err(SimError::InvalidConfig(format!(
                "pipeline_weight must be within [0, 1], got {}",
                self.pipeline_weight
            )));
        }
        if !self.high_risk_threshold.is_finite() {
            return Err(SimError::InvalidConfig(
                "high_risk_threshold must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                warn!(key = key, value = %raw, "ignoring unparsable config value");
                default
            }
        },
        Err(_) => default,
    }
}
