pub mod authenticator;
pub mod config;
pub mod hsm;
pub mod key_fob;
pub mod security_log;

pub use authenticator::{AuthOutcome, AuthState, Authenticator, RotationReport};
pub use config::AuthConfig;
pub use hsm::{
    AuthError, Challenge, DenialReason, KeyMatch, KeypairStore, PerformanceMetrics, PublicKey,
    Result, RotationPolicy, RotationTrigger,
};
pub use key_fob::KeyFob;
pub use security_log::{SecurityEvent, SecurityLogger, verify_log_file};
