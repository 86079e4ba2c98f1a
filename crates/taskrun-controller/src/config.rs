//! Controller configuration.

use std::time::Duration;

/// Image carrying the entrypoint binary copied into every workload.
pub const DEFAULT_ENTRYPOINT_IMAGE: &str = "override-with-entrypoint:latest";

/// Image used to check out git resources.
pub const DEFAULT_GIT_IMAGE: &str = "override-with-git:latest";

/// Image used for shell staging steps (mkdir/cp).
pub const DEFAULT_BASH_NOOP_IMAGE: &str = "override-with-bash-noop:latest";

/// Image used to fetch storage resources.
pub const DEFAULT_STORAGE_IMAGE: &str = "override-with-gsutil-image:latest";

/// Controller configuration, passed explicitly to everything that needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Image whose `/entrypoint` is copied into the tools volume.
    pub entrypoint_image: String,

    /// Image for git fetch steps.
    pub git_image: String,

    /// Image for create-dir and copy staging steps.
    pub bash_noop_image: String,

    /// Image for storage fetch steps.
    pub storage_image: String,

    /// Interval between full resyncs of all runs (seconds).
    pub resync_interval_secs: u64,

    /// First requeue delay after a failed reconcile (milliseconds).
    pub requeue_base_delay_ms: u64,

    /// Upper bound on the requeue delay (seconds).
    pub requeue_max_delay_secs: u64,
}

impl Config {
    /// Delay before the `attempt`-th retry of a key (0-based).
    pub fn requeue_delay(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.requeue_base_delay_ms);
        let max = Duration::from_secs(self.requeue_max_delay_secs);
        base.saturating_mul(2u32.saturating_pow(attempt.min(16)))
            .min(max)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            entrypoint_image: DEFAULT_ENTRYPOINT_IMAGE.to_string(),
            git_image: DEFAULT_GIT_IMAGE.to_string(),
            bash_noop_image: DEFAULT_BASH_NOOP_IMAGE.to_string(),
            storage_image: DEFAULT_STORAGE_IMAGE.to_string(),
            resync_interval_secs: 30,
            requeue_base_delay_ms: 5,
            requeue_max_delay_secs: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requeue_delay_backs_off_and_caps() {
        let config = Config {
            requeue_base_delay_ms: 100,
            requeue_max_delay_secs: 1,
            ..Config::default()
        };
        assert_eq!(config.requeue_delay(0), Duration::from_millis(100));
        assert_eq!(config.requeue_delay(2), Duration::from_millis(400));
        assert_eq!(config.requeue_delay(10), Duration::from_secs(1));
    }
}
