use std::path::PathBuf;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, AuthError>;

/// Structural and infrastructure failures.
///
/// A signature that simply does not verify is never an `AuthError`; it is
/// reported as a `false` / `Denied` outcome by the verifier and authenticator.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Secure random source could not produce bytes
    #[error("entropy source unavailable: {0}")]
    EntropySource(String),

    /// Key file or rotation record could not be read or written
    #[error("persistence failure at {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Persisted key material exists but cannot be decoded
    #[error("corrupt key material in {}: {reason}", path.display())]
    CorruptKeyMaterial { path: PathBuf, reason: String },

    /// Private key unusable for signing
    #[error("signing failed: {0}")]
    Signing(String),

    /// Malformed signature or public key input
    #[error("malformed verification input: {0}")]
    Verification(String),

    #[error("invalid vehicle id: {0:?}")]
    InvalidVehicleId(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl AuthError {
    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AuthError::Persistence {
            path: path.into(),
            source,
        }
    }

    /// True for failures of the system itself (RNG, storage, key files),
    /// as opposed to bad caller input.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            AuthError::EntropySource(_)
                | AuthError::Persistence { .. }
                | AuthError::CorruptKeyMaterial { .. }
        )
    }
}

/// Why an authentication attempt was denied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    /// No pending challenge with this id (never issued, or superseded)
    UnknownChallenge,
    /// Challenge was issued but its TTL ran out before the response arrived
    ChallengeExpired,
    /// Challenge was already answered once
    ChallengeReplayed,
    /// Neither the current key nor any archived key accepts the signature
    InvalidSignature,
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenialReason::UnknownChallenge => write!(f, "Unknown or superseded challenge"),
            DenialReason::ChallengeExpired => write!(f, "Challenge expired"),
            DenialReason::ChallengeReplayed => write!(f, "Challenge already consumed (replay)"),
            DenialReason::InvalidSignature => write!(f, "Signature rejected by all known keys"),
        }
    }
}
