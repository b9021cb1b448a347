//! # Engine Configuration
//!
//! Loaded once at startup from TOML. Every key is optional:
//!
//! ```toml
//! tick_size_ms = 16          # simulated ms per tick
//! frame_budget_ms = 16       # wall-clock ms per loop iteration
//! lag_policy = "frame_budget"
//! execution = "parallel"
//! profile_interval = 60      # iterations per profiling sample, 0 = off
//! max_ticks_per_frame = 0    # catch-up cap, 0 = unlimited
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Default simulated tick and frame budget (60 Hz, rounded down).
pub const DEFAULT_TICK_MS: u64 = 16;

/// What the catch-up loop subtracts from accumulated lag per tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LagPolicy {
    /// Each tick consumes one frame budget of wall time. Tick size is purely
    /// simulated time, so a tick size larger than the budget fast-forwards.
    #[default]
    FrameBudget,
    /// Each tick consumes its own simulated duration of wall time.
    TickSize,
}

/// How update routines run within one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Fan out across the rayon pool, join before the swap barrier.
    #[default]
    Parallel,
    /// Run in registration order on the scheduler thread.
    Sequential,
}

/// Configuration for the scheduler and core.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Simulated milliseconds advanced by one tick.
    pub tick_size_ms: u64,
    /// Wall-clock milliseconds allotted to one loop iteration.
    pub frame_budget_ms: u64,
    /// Lag accounting inside the catch-up loop.
    pub lag_policy: LagPolicy,
    /// Parallel or sequential routine execution.
    pub execution: ExecutionMode,
    /// Loop iterations aggregated into one profiling sample (0 disables).
    pub profile_interval: u32,
    /// Maximum ticks per iteration before rendering anyway (0 = unlimited).
    pub max_ticks_per_frame: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_size_ms: DEFAULT_TICK_MS,
            frame_budget_ms: DEFAULT_TICK_MS,
            lag_policy: LagPolicy::FrameBudget,
            execution: ExecutionMode::Parallel,
            profile_interval: 60,
            max_ticks_per_frame: 0,
        }
    }
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] on bad syntax or unknown keys,
    /// [`ConfigError::Invalid`] on unusable values.
    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&source)?;
        tracing::debug!(path = %path.display(), ?config, "loaded engine config");
        Ok(config)
    }

    /// Rejects values the scheduler cannot run with.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for a zero tick size or frame budget.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.tick_size_ms == 0 {
            return Err(ConfigError::Invalid("tick_size_ms must be greater than zero".into()));
        }
        if self.frame_budget_ms == 0 {
            return Err(ConfigError::Invalid("frame_budget_ms must be greater than zero".into()));
        }
        Ok(())
    }

    /// Wall-clock budget of one iteration.
    #[inline]
    #[must_use]
    pub fn frame_budget(&self) -> Duration {
        Duration::from_millis(self.frame_budget_ms)
    }

    /// Wall-clock time one tick consumes from the lag.
    #[inline]
    #[must_use]
    pub fn lag_step(&self) -> Duration {
        match self.lag_policy {
            LagPolicy::FrameBudget => Duration::from_millis(self.frame_budget_ms),
            LagPolicy::TickSize => Duration::from_millis(self.tick_size_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.lag_step(), Duration::from_millis(16));
    }

    #[test]
    fn test_full_document() {
        let config = EngineConfig::from_toml_str(
            r#"
            tick_size_ms = 10
            frame_budget_ms = 20
            lag_policy = "tick_size"
            execution = "sequential"
            profile_interval = 0
            max_ticks_per_frame = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.tick_size_ms, 10);
        assert_eq!(config.execution, ExecutionMode::Sequential);
        assert_eq!(config.lag_step(), Duration::from_millis(10));
        assert_eq!(config.frame_budget(), Duration::from_millis(20));
        assert_eq!(config.max_ticks_per_frame, 5);
    }

    #[test]
    fn test_rejects_zero_tick_and_unknown_keys() {
        assert!(matches!(
            EngineConfig::from_toml_str("tick_size_ms = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("frame_budget_ms = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("tick_rate = 60"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            EngineConfig::load("/nonexistent/lockstep.toml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
