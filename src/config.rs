// Authentication Configuration
// Defaults suit a single vehicle with one paired key fob; environment
// variables and JSON files override them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::hsm::errors::{AuthError, Result};
use crate::hsm::key_rotation::RotationPolicy;
use crate::hsm::keypair_store::DEFAULT_MAX_ARCHIVED_KEYS;
use crate::hsm::nonce::{
    DEFAULT_CHALLENGE_TTL_SECS, DEFAULT_NONCE_LENGTH, MAX_CHALLENGE_TTL_SECS, RngConfig,
};
use crate::hsm::replay::DEFAULT_REPLAY_WINDOW_SIZE;

/// Everything an authenticator needs besides the vehicle id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Root directory holding one key set per vehicle
    pub keys_dir: PathBuf,

    /// Challenge nonce length in bytes
    pub nonce_length: usize,

    pub rotation: RotationPolicy,

    /// Retired public keys kept for the grace window
    pub max_archived_keys: usize,

    pub challenge_ttl_secs: i64,

    /// Outstanding challenges per vehicle (1 = a new challenge supersedes the last)
    pub max_pending_challenges: usize,

    /// Consumed challenges remembered for replay detection
    pub replay_window_size: usize,

    /// Security log directory (None = no audit log)
    pub log_dir: Option<PathBuf>,

    pub rng: RngConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            keys_dir: PathBuf::from("keys"),
            nonce_length: DEFAULT_NONCE_LENGTH,
            rotation: RotationPolicy::default(),
            max_archived_keys: DEFAULT_MAX_ARCHIVED_KEYS,
            challenge_ttl_secs: DEFAULT_CHALLENGE_TTL_SECS,
            max_pending_challenges: 1,
            replay_window_size: DEFAULT_REPLAY_WINDOW_SIZE,
            log_dir: None,
            rng: RngConfig::default(),
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl AuthConfig {
    /// Create configuration from `VKA_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    /// Unparsable values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        let number = |name: &str| lookup(name).and_then(|v| v.trim().parse::<i64>().ok());
        let count = |name: &str| lookup(name).and_then(|v| v.trim().parse::<usize>().ok());
        let flag = |name: &str| lookup(name).and_then(|v| parse_flag(&v));

        if let Some(dir) = lookup("VKA_KEYS_DIR") {
            config.keys_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("VKA_LOG_DIR") {
            config.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(len) = count("VKA_NONCE_LENGTH") {
            config.nonce_length = len;
        }
        if let Some(secs) = number("VKA_ROTATION_INTERVAL_SECS") {
            config.rotation.rotation_interval_secs = secs;
        }
        if let Some(threshold) = lookup("VKA_ROTATION_AUTH_THRESHOLD")
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            config.rotation.rotation_auth_threshold = threshold;
        }
        if let Some(enabled) = flag("VKA_TIME_ROTATION") {
            config.rotation.time_based_enabled = enabled;
        }
        if let Some(enabled) = flag("VKA_COUNT_ROTATION") {
            config.rotation.counter_based_enabled = enabled;
        }
        if let Some(max) = count("VKA_MAX_ARCHIVED_KEYS") {
            config.max_archived_keys = max;
        }
        if let Some(secs) = number("VKA_CHALLENGE_TTL_SECS") {
            config.challenge_ttl_secs = secs;
        }
        if let Some(max) = count("VKA_MAX_PENDING_CHALLENGES") {
            config.max_pending_challenges = max;
        }
        if let Some(size) = count("VKA_REPLAY_WINDOW") {
            config.replay_window_size = size;
        }

        if let Some(enabled) = flag("VKA_ENABLE_HWRNG") {
            config.rng.enable_hwrng = enabled;
        }
        if let Some(path) = lookup("VKA_HWRNG_PATH") {
            config.rng.hwrng_path = path;
        }
        if let Some(fallback) = flag("VKA_RNG_FALLBACK") {
            config.rng.fallback_to_osrng = fallback;
        }

        config
    }

    /// Load configuration from a JSON file; missing fields take defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| AuthError::persistence(path, e))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| AuthError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.nonce_length == 0 {
            return Err(AuthError::Config(
                "nonce_length must be at least 1".to_string(),
            ));
        }
        if self.max_pending_challenges == 0 {
            return Err(AuthError::Config(
                "max_pending_challenges must be at least 1".to_string(),
            ));
        }
        if self.challenge_ttl_secs <= 0 {
            return Err(AuthError::Config(
                "challenge_ttl_secs must be positive".to_string(),
            ));
        }
        if self.challenge_ttl_secs > MAX_CHALLENGE_TTL_SECS {
            return Err(AuthError::Config(format!(
                "challenge_ttl_secs must not exceed {}",
                MAX_CHALLENGE_TTL_SECS
            )));
        }
        if !self.rotation.time_based_enabled && !self.rotation.counter_based_enabled {
            return Err(AuthError::Config(
                "at least one rotation trigger must be enabled".to_string(),
            ));
        }
        if self.rotation.time_based_enabled && self.rotation.rotation_interval_secs <= 0 {
            return Err(AuthError::Config(
                "rotation_interval_secs must be positive".to_string(),
            ));
        }
        if self.rotation.counter_based_enabled && self.rotation.rotation_auth_threshold == 0 {
            return Err(AuthError::Config(
                "rotation_auth_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
