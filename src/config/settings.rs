use serde::{Deserialize, Serialize};

/// Settings from taskbridge.yaml
///
/// Everything has a sensible default so a missing file or a partial file
/// both work; hosts persist only what they change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(rename = "Bus", default)]
    pub bus: BusSettings,

    #[serde(rename = "Progress", default)]
    pub progress: ProgressSettings,

    #[serde(rename = "Logging", default)]
    pub logging: LoggingSettings,
}

/// Request/response bus tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusSettings {
    /// Bound on the owner request queue; senders park when it is full.
    #[serde(rename = "Queue Capacity", default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Progress protocol tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSettings {
    /// Seconds a worker is told to wait when the gauge is busy.
    #[serde(rename = "Wait Seconds", default = "default_wait_seconds")]
    pub wait_seconds: u64,

    /// Longest tick label forwarded to the indicator, in characters.
    #[serde(rename = "Label Limit", default = "default_label_limit")]
    pub label_limit: usize,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            wait_seconds: default_wait_seconds(),
            label_limit: default_label_limit(),
        }
    }
}

/// Logging setup passed to [`crate::logging::setup_from_settings`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(rename = "Log Directory", default = "default_log_dir")]
    pub directory: String,

    #[serde(rename = "Log Prefix", default = "default_log_prefix")]
    pub prefix: String,

    #[serde(rename = "Debug Mode", default)]
    pub debug_mode: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: default_log_dir(),
            prefix: default_log_prefix(),
            debug_mode: false,
        }
    }
}

fn default_queue_capacity() -> usize {
    64
}

fn default_wait_seconds() -> u64 {
    3
}

fn default_label_limit() -> usize {
    120
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_log_prefix() -> String {
    "taskbridge".to_string()
}
