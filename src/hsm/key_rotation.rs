// Key Rotation Policy - decides when the vehicle signing keypair is replaced
//
// - Time-based rotation (interval since last activation)
// - Usage-based rotation (successful authentications since last activation)
// - Missing or unreadable rotation record always means "rotate"

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default interval between rotations: 24 hours
pub const DEFAULT_ROTATION_INTERVAL_SECS: i64 = 24 * 60 * 60;

/// Default successful authentications per keypair
pub const DEFAULT_ROTATION_AUTH_THRESHOLD: u64 = 5;

/// Rotation bookkeeping owned by the authenticator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationState {
    /// When the active keypair was activated (None = record missing/unparsable)
    pub last_rotation: Option<DateTime<Utc>>,

    /// Successful authentications with the active keypair
    pub auth_count: u64,
}

impl RotationState {
    pub fn new(last_rotation: Option<DateTime<Utc>>) -> Self {
        Self {
            last_rotation,
            auth_count: 0,
        }
    }

    /// Count one successful authentication
    pub fn record_success(&mut self) {
        self.auth_count = self.auth_count.saturating_add(1);
    }

    /// Start a fresh period after a rotation
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.last_rotation = Some(now);
        self.auth_count = 0;
    }
}

/// Why a rotation happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationTrigger {
    /// No usable last-rotation record
    MissingRecord,
    /// Rotation interval elapsed
    IntervalElapsed,
    /// Authentication count reached the threshold
    UsageThreshold,
    /// Operator-requested rotation
    Forced,
}

impl fmt::Display for RotationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RotationTrigger::MissingRecord => write!(f, "rotation record missing"),
            RotationTrigger::IntervalElapsed => write!(f, "rotation interval elapsed"),
            RotationTrigger::UsageThreshold => write!(f, "authentication threshold reached"),
            RotationTrigger::Forced => write!(f, "forced"),
        }
    }
}

/// Key rotation policy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationPolicy {
    /// Enable time-based rotation (rotate every N seconds)
    pub time_based_enabled: bool,
    pub rotation_interval_secs: i64,

    /// Enable usage-based rotation (rotate every N successful authentications)
    pub counter_based_enabled: bool,
    pub rotation_auth_threshold: u64,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            time_based_enabled: true,
            rotation_interval_secs: DEFAULT_ROTATION_INTERVAL_SECS,
            counter_based_enabled: true,
            rotation_auth_threshold: DEFAULT_ROTATION_AUTH_THRESHOLD,
        }
    }
}

impl RotationPolicy {
    /// Create policy with only time-based rotation
    pub fn time_based_only(interval_secs: i64) -> Self {
        Self {
            time_based_enabled: true,
            rotation_interval_secs: interval_secs,
            counter_based_enabled: false,
            ..Default::default()
        }
    }

    /// Create policy with only usage-based rotation
    pub fn counter_based_only(auth_threshold: u64) -> Self {
        Self {
            time_based_enabled: false,
            counter_based_enabled: true,
            rotation_auth_threshold: auth_threshold,
            ..Default::default()
        }
    }

    pub fn should_rotate(&self, state: &RotationState, now: DateTime<Utc>) -> bool {
        self.rotation_reason(state, now).is_some()
    }

    /// First trigger that fires, if any
    pub fn rotation_reason(
        &self,
        state: &RotationState,
        now: DateTime<Utc>,
    ) -> Option<RotationTrigger> {
        let Some(last_rotation) = state.last_rotation else {
            return Some(RotationTrigger::MissingRecord);
        };

        if self.time_based_enabled {
            let elapsed = (now - last_rotation).num_seconds();
            if elapsed > self.rotation_interval_secs {
                return Some(RotationTrigger::IntervalElapsed);
            }
        }

        if self.counter_based_enabled && state.auth_count >= self.rotation_auth_threshold {
            return Some(RotationTrigger::UsageThreshold);
        }

        None
    }
}
