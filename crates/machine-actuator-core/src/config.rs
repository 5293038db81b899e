//! Configuration types for the machine actuator
//!
//! All knobs have defaults; the delete-confirmation timeout may additionally be
//! overridden from the environment.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable overriding the instance delete timeout (minutes)
pub const INSTANCE_DELETE_TIMEOUT_ENV: &str = "CLUSTER_API_OPENSTACK_INSTANCE_DELETE_TIMEOUT";

/// Actuator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorConfig {
    /// How long a replace-in-place update waits for the old instance to go
    /// away (in minutes)
    #[serde(default = "default_instance_delete_timeout_minutes")]
    pub instance_delete_timeout_minutes: u64,

    /// Fixed interval between instance existence checks (in seconds)
    #[serde(default = "default_instance_status_retry_interval_secs")]
    pub instance_status_retry_interval_secs: u64,

    /// Lifetime of worker bootstrap tokens (in minutes)
    #[serde(default = "default_bootstrap_token_ttl_minutes")]
    pub bootstrap_token_ttl_minutes: u64,

    /// Attempts for a machine record write that keeps hitting conflicts
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: usize,

    /// Capacity of the lifecycle event channel
    ///
    /// When full, new events are dropped with a warning log.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl ActuatorConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self {
            instance_delete_timeout_minutes: default_instance_delete_timeout_minutes(),
            instance_status_retry_interval_secs: default_instance_status_retry_interval_secs(),
            bootstrap_token_ttl_minutes: default_bootstrap_token_ttl_minutes(),
            conflict_retries: default_conflict_retries(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    /// Defaults plus overrides read from the process environment
    pub fn from_env() -> Self {
        let mut config = Self::new();
        config.instance_delete_timeout_minutes =
            timeout_minutes(std::env::var(INSTANCE_DELETE_TIMEOUT_ENV).ok().as_deref());
        config
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.instance_delete_timeout_minutes == 0 {
            return Err(crate::Error::config("instance delete timeout must be > 0"));
        }
        if self.instance_status_retry_interval_secs == 0 {
            return Err(crate::Error::config("instance status retry interval must be > 0"));
        }
        if self.bootstrap_token_ttl_minutes == 0 {
            return Err(crate::Error::config("bootstrap token TTL must be > 0"));
        }
        if self.conflict_retries == 0 {
            return Err(crate::Error::config("conflict retries must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("event channel capacity must be > 0"));
        }
        Ok(())
    }

    /// Replace-in-place delete confirmation window
    pub fn instance_delete_timeout(&self) -> Duration {
        Duration::from_secs(self.instance_delete_timeout_minutes * 60)
    }

    /// Interval between existence checks while waiting for a delete
    pub fn instance_status_retry_interval(&self) -> Duration {
        Duration::from_secs(self.instance_status_retry_interval_secs)
    }

    /// Bootstrap token lifetime
    pub fn bootstrap_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.bootstrap_token_ttl_minutes as i64)
    }
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a timeout override in minutes, falling back to the default on a
/// missing, unparsable or zero value
fn timeout_minutes(raw: Option<&str>) -> u64 {
    match raw.map(str::trim).map(str::parse::<u64>) {
        Some(Ok(minutes)) if minutes > 0 => minutes,
        Some(_) => {
            tracing::warn!(
                "{} is not a positive number of minutes, using default of {}",
                INSTANCE_DELETE_TIMEOUT_ENV,
                default_instance_delete_timeout_minutes()
            );
            default_instance_delete_timeout_minutes()
        }
        None => default_instance_delete_timeout_minutes(),
    }
}

fn default_instance_delete_timeout_minutes() -> u64 {
    5
}

fn default_instance_status_retry_interval_secs() -> u64 {
    10
}

fn default_bootstrap_token_ttl_minutes() -> u64 {
    60
}

fn default_conflict_retries() -> usize {
    5
}

fn default_event_channel_capacity() -> usize {
    1000
}
