use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// One logical message on the wire. Serializes to a single JSON object
/// tagged by `type`, one per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Command {
        action: String,
        timestamp: f64,
    },
    SystemData {
        #[serde(flatten)]
        sample: TelemetrySample,
        timestamp: f64,
    },
    Ack {
        action: String,
        status: AckStatus,
        message: String,
        timestamp: f64,
    },
    Heartbeat {
        timestamp: f64,
    },
}

impl Message {
    pub fn command(action: impl Into<String>) -> Self {
        Message::Command {
            action: action.into(),
            timestamp: epoch_secs(),
        }
    }

    pub fn heartbeat() -> Self {
        Message::Heartbeat {
            timestamp: epoch_secs(),
        }
    }

    pub fn system_data(sample: TelemetrySample) -> Self {
        Message::SystemData {
            sample,
            timestamp: epoch_secs(),
        }
    }

    pub fn ack(result: &CommandResult) -> Self {
        Message::Ack {
            action: result.action.clone(),
            status: result.status,
            message: result.message.clone(),
            timestamp: epoch_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Success,
    Failed,
}

/// Outcome of executing one command, echoed back as an `ack` frame.
///
/// The wire carries no request id, so a result correlates with its request
/// by `action` value and temporal adjacency only.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub action: String,
    pub status: AckStatus,
    pub message: String,
}

impl CommandResult {
    pub fn success(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            status: AckStatus::Success,
            message: message.into(),
        }
    }

    pub fn failed(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            status: AckStatus::Failed,
            message: message.into(),
        }
    }
}

/// One snapshot of host metrics, shipped as the payload of a `system_data`
/// frame. Net counters are cumulative since boot; a decrease means the
/// counter reset (host reboot), not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub cpu_percent: f64,
    pub ram_used_gb: f64,
    pub ram_total_gb: f64,
    pub net_sent_mb: f64,
    pub net_recv_mb: f64,
    pub date: String,
    pub time: String,
}

/// Sender-local wall clock, seconds since the epoch. Informational only,
/// never used for ordering.
pub fn epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
