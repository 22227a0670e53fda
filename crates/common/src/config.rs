use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Typed configuration surface the host hands to the core. Loading this
/// from TOML/env/dotfiles is the host's job; the core only consumes the
/// already-populated struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Path to the single SQLite file backing both `Agent` and
    /// `AgentMessage` tables.
    pub database_path: PathBuf,

    /// Bounded size of the launch queue's FIFO.
    #[serde(default = "default_launch_queue_capacity")]
    pub launch_queue_capacity: usize,

    /// Grace period between SIGTERM and SIGKILL when stopping a runner.
    #[serde(with = "duration_secs", default = "default_stop_grace_period")]
    pub stop_grace_period: Duration,

    /// Retry budget for `UNIQUE(agent_id, sequence_number)` races.
    #[serde(default = "default_unique_violation_retries")]
    pub unique_violation_retries: u32,

    /// Buffer capacity of each subscriber's per-observer channel used for
    /// fan-out.
    #[serde(default = "default_subscriber_channel_capacity")]
    pub subscriber_channel_capacity: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("agents.db"),
            launch_queue_capacity: default_launch_queue_capacity(),
            stop_grace_period: default_stop_grace_period(),
            unique_violation_retries: default_unique_violation_retries(),
            subscriber_channel_capacity: default_subscriber_channel_capacity(),
        }
    }
}

fn default_launch_queue_capacity() -> usize {
    256
}

fn default_stop_grace_period() -> Duration {
    Duration::from_secs(5)
}

fn default_unique_violation_retries() -> u32 {
    5
}

fn default_subscriber_channel_capacity() -> usize {
    1024
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
