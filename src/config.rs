//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Engine name, used in log fields.
    pub name: String,
    /// Maximum number of jobs running at once.
    pub max_concurrent: usize,
    /// Optional per-job timeout. `None` lets handlers run until they return.
    pub job_timeout: Option<Duration>,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "job-engine".to_string(),
            max_concurrent: 5,
            job_timeout: None,
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let name = lookup("JOB_ENGINE_NAME")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.name);

        let max_concurrent = match lookup("JOB_ENGINE_MAX_CONCURRENT") {
            Some(raw) => parse_value("JOB_ENGINE_MAX_CONCURRENT", &raw)?,
            None => defaults.max_concurrent,
        };

        let job_timeout = match lookup("JOB_ENGINE_JOB_TIMEOUT_SECS") {
            Some(raw) => Some(Duration::from_secs(parse_value(
                "JOB_ENGINE_JOB_TIMEOUT_SECS",
                &raw,
            )?)),
            None => defaults.job_timeout,
        };

        let event_capacity = match lookup("JOB_ENGINE_EVENT_CAPACITY") {
            Some(raw) => parse_value("JOB_ENGINE_EVENT_CAPACITY", &raw)?,
            None => defaults.event_capacity,
        };

        let config = Self {
            name,
            max_concurrent,
            job_timeout,
            event_capacity,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_concurrent".to_string(),
                message: "must be a positive integer".to_string(),
            });
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "event_capacity".to_string(),
                message: "must be a positive integer".to_string(),
            });
        }
        if self.job_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::InvalidValue {
                key: "job_timeout".to_string(),
                message: "must be greater than zero when set".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{raw:?}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_concurrent, 5);
        assert!(config.job_timeout.is_none());
    }

    #[test]
    fn lookup_overrides_defaults() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("JOB_ENGINE_NAME", "archiver"),
            ("JOB_ENGINE_MAX_CONCURRENT", "2"),
            ("JOB_ENGINE_JOB_TIMEOUT_SECS", "30"),
        ]))
        .unwrap();
        assert_eq!(config.name, "archiver");
        assert_eq!(config.max_concurrent, 2);
        assert_eq!(config.job_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.event_capacity, 256);
    }

    #[test]
    fn negative_concurrency_is_rejected() {
        let result =
            EngineConfig::from_lookup(lookup_from(&[("JOB_ENGINE_MAX_CONCURRENT", "-1")]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "JOB_ENGINE_MAX_CONCURRENT"
        ));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let result = EngineConfig::from_lookup(lookup_from(&[("JOB_ENGINE_MAX_CONCURRENT", "0")]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "max_concurrent"
        ));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = EngineConfig::default().with_job_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn blank_name_falls_back_to_default() {
        let config = EngineConfig::from_lookup(lookup_from(&[("JOB_ENGINE_NAME", "  ")])).unwrap();
        assert_eq!(config.name, "job-engine");
    }
}
