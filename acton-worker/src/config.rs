//! Configuration for the background worker.

use crate::commits::RetryPolicy;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkerConfig {
    /// Job queue configuration.
    #[serde(default)]
    pub jobs: JobsConfig,
    /// Session store configuration.
    #[serde(default)]
    pub sessions: SessionsConfig,
    /// Commit queue configuration.
    #[serde(default)]
    pub commits: CommitsConfig,
}

/// Job queue configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    /// Maximum number of pending jobs before producers are held back.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Session store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionsConfig {
    /// Timeout for a single round-trip to the session agent, in milliseconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// How long ended sessions stay queryable, in seconds.
    #[serde(default = "default_retention")]
    pub retention_seconds: u64,
    /// Interval between purges of ended sessions, in seconds.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
}

/// Commit queue configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitsConfig {
    /// Branch every commit is applied to.
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Attempts per operation for transient conflicts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds. Doubles per attempt.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    /// Upper bound for a single retry delay, in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// Timeout for each call to the external store, in milliseconds.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,
}

// Default value functions
const fn default_queue_capacity() -> usize {
    128
}

const fn default_request_timeout() -> u64 {
    5000
}

const fn default_retention() -> u64 {
    300 // 5 minutes
}

const fn default_cleanup_interval() -> u64 {
    60
}

fn default_branch() -> String {
    "main".to_string()
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_base_delay() -> u64 {
    500
}

const fn default_max_delay() -> u64 {
    30_000
}

const fn default_call_timeout() -> u64 {
    30_000
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout(),
            retention_seconds: default_retention(),
            cleanup_interval_seconds: default_cleanup_interval(),
        }
    }
}

impl Default for CommitsConfig {
    fn default() -> Self {
        Self {
            branch: default_branch(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            call_timeout_ms: default_call_timeout(),
        }
    }
}

impl SessionsConfig {
    /// Round-trip timeout for session agent requests.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Retention window for ended sessions.
    #[must_use]
    pub const fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_seconds)
    }

    /// Interval between purges of ended sessions, at least one second.
    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds.max(1))
    }
}

impl CommitsConfig {
    /// Retry policy derived from this configuration.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }

    /// Timeout applied to each external store call.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl WorkerConfig {
    /// Load configuration from files and environment.
    ///
    /// Sources, later ones winning: `config/default.toml`, `config/local.toml`,
    /// then `ACTON_WORKER_*` environment variables (`__` separates sections,
    /// e.g. `ACTON_WORKER_COMMITS__BRANCH`).
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::from_figment(
            Figment::new()
                .merge(Toml::file("config/default.toml"))
                .merge(Toml::file("config/local.toml"))
                .merge(Env::prefixed("ACTON_WORKER_").split("__")),
        )
    }

    /// Extract configuration from an already assembled figment.
    ///
    /// # Errors
    ///
    /// Returns an error if the figment cannot be deserialized.
    pub fn from_figment(figment: Figment) -> Result<Self, Box<figment::Error>> {
        figment.extract().map_err(Box::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.jobs.queue_capacity, 128);
        assert_eq!(config.sessions.request_timeout_ms, 5000);
        assert_eq!(config.commits.branch, "main");
        assert_eq!(config.commits.max_attempts, 5);
        assert_eq!(config.commits.base_delay_ms, 500);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let figment = Figment::new().merge(Toml::string(
            r#"
            [jobs]
            queue_capacity = 8

            [commits]
            branch = "transcripts"
            max_attempts = 3
            "#,
        ));

        let config = WorkerConfig::from_figment(figment).unwrap();
        assert_eq!(config.jobs.queue_capacity, 8);
        assert_eq!(config.commits.branch, "transcripts");
        assert_eq!(config.commits.max_attempts, 3);
        assert_eq!(config.commits.max_delay_ms, 30_000);
        assert_eq!(config.sessions.retention_seconds, 300);
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = CommitsConfig {
            base_delay_ms: 100,
            max_delay_ms: 250,
            max_attempts: 4,
            ..CommitsConfig::default()
        };

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(250));
    }

    #[test]
    fn test_zero_cleanup_interval_is_clamped() {
        let figment = Figment::new().merge(Toml::string(
            r#"
            [sessions]
            cleanup_interval_seconds = 0
            "#,
        ));

        let config = WorkerConfig::from_figment(figment).unwrap();
        assert_eq!(config.sessions.cleanup_interval(), Duration::from_secs(1));
    }
}
