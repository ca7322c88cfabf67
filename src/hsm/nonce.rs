use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;

use super::errors::{AuthError, Result};

/// Challenge nonce length (bytes)
pub const DEFAULT_NONCE_LENGTH: usize = 16;

/// Default lifetime of an issued challenge (seconds)
pub const DEFAULT_CHALLENGE_TTL_SECS: i64 = 30;

/// Longest accepted challenge lifetime (seconds)
pub const MAX_CHALLENGE_TTL_SECS: i64 = 86_400;

/// Configuration for the challenge entropy source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RngConfig {
    /// Read from a hardware RNG device before touching the OS CSPRNG
    pub enable_hwrng: bool,

    /// Path to hardware RNG device (default: /dev/hwrng)
    pub hwrng_path: String,

    /// Allow fallback to OsRng if the hardware device is unavailable
    pub fallback_to_osrng: bool,
}

impl Default for RngConfig {
    fn default() -> Self {
        Self {
            enable_hwrng: false,
            hwrng_path: "/dev/hwrng".to_string(),
            fallback_to_osrng: true,
        }
    }
}

/// Random byte source behind the nonce generator
enum NonceSource {
    /// Hardware RNG device (e.g., /dev/hwrng on a Raspberry Pi)
    HardwareDevice(File),

    /// OS-provided CSPRNG (getrandom)
    OsRng,
}

impl NonceSource {
    fn name(&self) -> &str {
        match self {
            NonceSource::HardwareDevice(_) => "HardwareDevice",
            NonceSource::OsRng => "OsRng",
        }
    }
}

/// One-shot random challenge issued by the vehicle.
///
/// The key fob signs the UTF-8 bytes of the lowercase hex encoding of the
/// nonce, which doubles as the challenge id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    nonce: Vec<u8>,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl Challenge {
    pub fn new(nonce: Vec<u8>, issued_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            nonce,
            issued_at,
            // Saturates at the end of representable time
            expires_at: issued_at
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Hex form of the nonce; this is the string the key fob signs
    pub fn id(&self) -> String {
        hex::encode(&self.nonce)
    }

    /// Bytes that must be signed to answer this challenge
    pub fn message(&self) -> Vec<u8> {
        self.id().into_bytes()
    }

    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Cryptographically secure challenge generator.
///
/// Every call pulls fresh bytes from the configured source; nothing is
/// buffered or seeded, so no two generators (or calls) share state.
pub struct NonceGenerator {
    source: NonceSource,
    nonce_length: usize,
    ttl: Duration,
    config: RngConfig,
}

impl NonceGenerator {
    /// Generator backed by the OS CSPRNG
    pub fn new(nonce_length: usize) -> Result<Self> {
        Self::with_config(nonce_length, RngConfig::default())
    }

    pub fn with_config(nonce_length: usize, config: RngConfig) -> Result<Self> {
        if nonce_length == 0 {
            return Err(AuthError::Config(
                "nonce length must be at least one byte".to_string(),
            ));
        }

        let source = if config.enable_hwrng && cfg!(target_os = "linux") {
            match File::open(&config.hwrng_path) {
                Ok(file) => NonceSource::HardwareDevice(file),
                Err(_) if config.fallback_to_osrng => NonceSource::OsRng,
                Err(e) => {
                    return Err(AuthError::EntropySource(format!(
                        "cannot open {}: {}",
                        config.hwrng_path, e
                    )));
                }
            }
        } else if config.fallback_to_osrng {
            NonceSource::OsRng
        } else {
            return Err(AuthError::EntropySource(
                "no random source configured".to_string(),
            ));
        };

        Ok(Self {
            source,
            nonce_length,
            ttl: Duration::seconds(DEFAULT_CHALLENGE_TTL_SECS),
            config,
        })
    }

    /// Set the lifetime stamped on generated challenges
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn nonce_length(&self) -> usize {
        self.nonce_length
    }

    /// Produce a fresh challenge of the configured length
    pub fn generate_challenge(&mut self) -> Result<Challenge> {
        let mut nonce = vec![0u8; self.nonce_length];
        self.fill(&mut nonce)?;
        Ok(Challenge::new(nonce, Utc::now(), self.ttl))
    }

    fn fill(&mut self, dest: &mut [u8]) -> Result<()> {
        let device_read = match &mut self.source {
            NonceSource::HardwareDevice(file) => Some(file.read_exact(dest)),
            NonceSource::OsRng => None,
        };

        match device_read {
            Some(Ok(())) => return Ok(()),
            Some(Err(e)) => {
                if !self.config.fallback_to_osrng {
                    return Err(AuthError::EntropySource(format!(
                        "read from {} failed: {}",
                        self.config.hwrng_path, e
                    )));
                }
                // Permanent switch; a failing device is not retried
                self.source = NonceSource::OsRng;
            }
            None => {}
        }

        rand::rngs::OsRng
            .try_fill_bytes(dest)
            .map_err(|e| AuthError::EntropySource(e.to_string()))
    }
}
