/// Challenge-Response Authenticator
///
/// Vehicle-side protocol orchestrator: issues one-shot challenges, verifies
/// key fob responses against the current key (falling back to the archive),
/// and rotates the vehicle keypair as a side effect of successful
/// authentication.
use chrono::{DateTime, Utc};
use colored::*;
use std::collections::VecDeque;
use std::fmt;

use crate::config::AuthConfig;
use crate::hsm::crypto::{KeyMatch, PublicKey, verify_detailed};
use crate::hsm::errors::{AuthError, DenialReason, Result};
use crate::hsm::key_rotation::{RotationPolicy, RotationState, RotationTrigger};
use crate::hsm::keypair_store::{ArchivedKey, KeypairStore};
use crate::hsm::nonce::{Challenge, NonceGenerator};
use crate::hsm::performance::{Operation, SharedMetrics, track};
use crate::hsm::replay::ConsumedChallenges;
use crate::key_fob::KeyFob;
use crate::security_log::SecurityLogger;

/// Observable protocol state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// No challenge outstanding
    Idle,
    /// At least one challenge awaits a response
    ChallengeIssued { pending: usize },
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthState::Idle => write!(f, "{}", "IDLE".green().bold()),
            AuthState::ChallengeIssued { pending } => {
                write!(f, "{} ({} pending)", "CHALLENGE ISSUED".yellow().bold(), pending)
            }
        }
    }
}

/// What a rotation did
#[derive(Debug, Clone)]
pub struct RotationReport {
    pub trigger: RotationTrigger,
    /// Fingerprint of the replaced key (None if it was unreadable)
    pub old_fingerprint: Option<String>,
    pub new_public_key: PublicKey,
    /// Archive entry holding the replaced public key
    pub retired: Option<ArchivedKey>,
    pub pruned: Vec<u64>,
    /// Archive entries that could not be removed
    pub prune_failures: Vec<String>,
}

/// Result of one authentication attempt
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    Granted {
        matched: KeyMatch,
        rotation: Option<RotationReport>,
    },
    Denied(DenialReason),
}

impl AuthOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, AuthOutcome::Granted { .. })
    }
}

/// Per-vehicle authenticator
pub struct Authenticator {
    vehicle_id: String,
    store: KeypairStore,
    policy: RotationPolicy,
    nonce_generator: NonceGenerator,
    /// Outstanding challenges, oldest first
    pending: VecDeque<Challenge>,
    max_pending: usize,
    consumed: ConsumedChallenges,
    rotation_state: RotationState,
    last_result: Option<bool>,
    security_logger: Option<SecurityLogger>,
    metrics: Option<SharedMetrics>,
}

impl Authenticator {
    /// Create an authenticator without logging or metrics
    pub fn new(vehicle_id: &str, config: &AuthConfig) -> Result<Self> {
        Self::with_collaborators(vehicle_id, config, None, None)
    }

    /// Create an authenticator, generating the vehicle's first keypair if needed
    pub fn with_collaborators(
        vehicle_id: &str,
        config: &AuthConfig,
        security_logger: Option<SecurityLogger>,
        metrics: Option<SharedMetrics>,
    ) -> Result<Self> {
        config.validate()?;

        let store = KeypairStore::open(&config.keys_dir, vehicle_id)?
            .with_max_archived_keys(config.max_archived_keys);
        let ttl = chrono::Duration::try_seconds(config.challenge_ttl_secs).ok_or_else(|| {
            AuthError::Config(format!(
                "challenge_ttl_secs out of range: {}",
                config.challenge_ttl_secs
            ))
        })?;
        let nonce_generator =
            NonceGenerator::with_config(config.nonce_length, config.rng.clone())?.with_ttl(ttl);

        let keypair = if store.has_keys() {
            match store.load_active() {
                Ok(keypair) => Some(keypair),
                // Stays unusable until force_key_generation replaces it
                Err(AuthError::CorruptKeyMaterial { path, reason }) => {
                    if let Some(logger) = &security_logger {
                        logger.log_key_material_corrupt(path.display().to_string(), reason);
                    }
                    None
                }
                Err(e) => return Err(e),
            }
        } else {
            let keypair = track(metrics.as_ref(), Operation::KeyGeneration, || {
                store.ensure_keys_exist()
            })?;
            store.write_last_rotation(Utc::now())?;
            if let Some(logger) = &security_logger {
                logger.log_keypair_generated(keypair.public().fingerprint());
            }
            Some(keypair)
        };

        if let Some(logger) = &security_logger
            && let Some(keypair) = &keypair
        {
            logger.log_startup(keypair.public().fingerprint());
        }

        Ok(Self {
            vehicle_id: vehicle_id.to_string(),
            rotation_state: RotationState::new(store.read_last_rotation()),
            store,
            policy: config.rotation.clone(),
            nonce_generator,
            pending: VecDeque::with_capacity(config.max_pending_challenges),
            max_pending: config.max_pending_challenges,
            consumed: ConsumedChallenges::new(config.replay_window_size, ttl),
            last_result: None,
            security_logger,
            metrics,
        })
    }

    pub fn vehicle_id(&self) -> &str {
        &self.vehicle_id
    }

    pub fn store(&self) -> &KeypairStore {
        &self.store
    }

    /// Key fob bound to this vehicle's key set
    pub fn pair_key_fob(&self) -> KeyFob {
        let fob = KeyFob::from_store(self.store.clone());
        match &self.metrics {
            Some(metrics) => fob.with_metrics(metrics.clone()),
            None => fob,
        }
    }

    pub fn public_key(&self) -> Result<PublicKey> {
        self.store.public_key()
    }

    pub fn state(&self) -> AuthState {
        if self.pending.is_empty() {
            AuthState::Idle
        } else {
            AuthState::ChallengeIssued {
                pending: self.pending.len(),
            }
        }
    }

    /// Outcome of the most recent verification, as a boolean
    pub fn last_result(&self) -> Option<bool> {
        self.last_result
    }

    pub fn rotation_state(&self) -> RotationState {
        self.rotation_state
    }

    pub fn metrics(&self) -> Option<&SharedMetrics> {
        self.metrics.as_ref()
    }

    /// Issue a fresh challenge; beyond the pending limit the oldest is dropped
    pub fn issue_challenge(&mut self) -> Result<Challenge> {
        let challenge = self.nonce_generator.generate_challenge()?;

        self.pending.push_back(challenge.clone());
        while self.pending.len() > self.max_pending {
            self.pending.pop_front();
        }

        if let Some(logger) = &self.security_logger {
            logger.log_challenge_issued(challenge.id(), challenge.expires_at());
        }

        Ok(challenge)
    }

    pub fn verify_response(
        &mut self,
        challenge_id: &str,
        signature_b64: &str,
    ) -> Result<AuthOutcome> {
        self.verify_response_at(challenge_id, signature_b64, Utc::now())
    }

    /// Verify a response as of `now`.
    ///
    /// The challenge is consumed whatever the outcome. Only a granted
    /// attempt touches the rotation state.
    pub fn verify_response_at(
        &mut self,
        challenge_id: &str,
        signature_b64: &str,
        now: DateTime<Utc>,
    ) -> Result<AuthOutcome> {
        let Some(index) = self.pending.iter().position(|c| c.id() == challenge_id) else {
            let reason = if self.consumed.was_consumed(challenge_id, now) {
                DenialReason::ChallengeReplayed
            } else {
                DenialReason::UnknownChallenge
            };
            return Ok(self.deny(challenge_id, reason));
        };

        let Some(challenge) = self.pending.remove(index) else {
            return Ok(self.deny(challenge_id, DenialReason::UnknownChallenge));
        };
        self.consumed.record(challenge_id, now);

        if challenge.is_expired_at(now) {
            return Ok(self.deny(challenge_id, DenialReason::ChallengeExpired));
        }

        // One snapshot of current key and archive for the whole check
        let current = self.store.public_key()?;
        let archive = self.store.load_archive()?;

        let verification = track(self.metrics.as_ref(), Operation::Verify, || {
            verify_detailed(&challenge.message(), signature_b64, &current, &archive)
        });
        self.record_latency(&challenge);

        let verification = match verification {
            Ok(verification) => verification,
            Err(e) => {
                self.last_result = Some(false);
                if let Some(logger) = &self.security_logger {
                    logger.log_auth_failure(challenge_id.to_string(), e.to_string());
                }
                return Err(e);
            }
        };

        if let Some(logger) = &self.security_logger {
            for skipped in &verification.skipped {
                logger.log_archive_entry_skipped(skipped.sequence, skipped.reason.clone());
            }
        }

        let Some(matched) = verification.matched else {
            return Ok(self.deny(challenge_id, DenialReason::InvalidSignature));
        };

        self.rotation_state.record_success();
        self.last_result = Some(true);
        if let Some(logger) = &self.security_logger {
            logger.log_auth_success(
                challenge_id.to_string(),
                matched.to_string(),
                self.rotation_state.auth_count,
            );
        }

        let rotation = match self.policy.rotation_reason(&self.rotation_state, now) {
            Some(trigger) => Some(self.rotate(trigger, now)?),
            None => None,
        };

        Ok(AuthOutcome::Granted { matched, rotation })
    }

    /// Rotate unconditionally (operator request)
    pub fn force_key_generation(&mut self) -> Result<RotationReport> {
        self.rotate(RotationTrigger::Forced, Utc::now())
    }

    fn rotate(&mut self, trigger: RotationTrigger, now: DateTime<Utc>) -> Result<RotationReport> {
        let old_fingerprint = self.store.public_key().ok().map(|key| key.fingerprint());

        let rotation = track(self.metrics.as_ref(), Operation::Rotation, || {
            self.store.rotate_at(now)
        })?;
        self.store.write_last_rotation(now)?;
        self.rotation_state.reset(now);

        let new_public_key = *rotation.keypair.public();
        if let Some(logger) = &self.security_logger {
            logger.log_key_rotated(
                trigger.to_string(),
                old_fingerprint.clone(),
                new_public_key.fingerprint(),
                rotation.retired.as_ref().map(|entry| entry.sequence),
            );
            if !rotation.pruned.is_empty() {
                logger.log_archive_pruned(rotation.pruned.clone());
            }
            for failure in &rotation.prune_failures {
                logger.log_archive_prune_failed(failure.clone());
            }
        }

        Ok(RotationReport {
            trigger,
            old_fingerprint,
            new_public_key,
            retired: rotation.retired,
            pruned: rotation.pruned,
            prune_failures: rotation.prune_failures,
        })
    }

    fn deny(&mut self, challenge_id: &str, reason: DenialReason) -> AuthOutcome {
        self.last_result = Some(false);
        if let Some(logger) = &self.security_logger {
            logger.log_auth_failure(challenge_id.to_string(), format!("{:?}", reason));
        }
        AuthOutcome::Denied(reason)
    }

    fn record_latency(&self, challenge: &Challenge) {
        if let Some(metrics) = &self.metrics
            && let Some(us) = (Utc::now() - challenge.issued_at()).num_microseconds()
            && let Ok(mut m) = metrics.lock()
        {
            m.record_e2e(us.max(0) as u64);
        }
    }
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("vehicle_id", &self.vehicle_id)
            .field("state", &self.state())
            .field("rotation_state", &self.rotation_state)
            .field("last_result", &self.last_result)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hsm::crypto::{PrivateKey, sign_base64};
    use crate::hsm::performance::PerformanceMetrics;
    use crate::security_log::verify_log_file;
    use chrono::Duration;
    use std::fs;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> AuthConfig {
        AuthConfig {
            keys_dir: dir.path().join("keys"),
            ..AuthConfig::default()
        }
    }

    fn count_only_config(dir: &TempDir, threshold: u64) -> AuthConfig {
        AuthConfig {
            rotation: RotationPolicy::counter_based_only(threshold),
            ..config_in(dir)
        }
    }

    fn answer(auth: &Authenticator, challenge: &Challenge) -> String {
        auth.pair_key_fob().sign_challenge(&challenge.id()).unwrap()
    }

    #[test]
    fn test_successful_authentication() {
        let dir = TempDir::new().unwrap();
        let mut auth = Authenticator::new("V001", &config_in(&dir)).unwrap();
        assert_eq!(auth.state(), AuthState::Idle);
        assert_eq!(auth.last_result(), None);

        let challenge = auth.issue_challenge().unwrap();
        assert_eq!(auth.state(), AuthState::ChallengeIssued { pending: 1 });

        let signature = answer(&auth, &challenge);
        let outcome = auth.verify_response(&challenge.id(), &signature).unwrap();

        assert!(matches!(
            outcome,
            AuthOutcome::Granted {
                matched: KeyMatch::Current,
                rotation: None
            }
        ));
        assert_eq!(auth.state(), AuthState::Idle);
        assert_eq!(auth.last_result(), Some(true));
        assert_eq!(auth.rotation_state().auth_count, 1);
    }

    #[test]
    fn test_first_start_writes_rotation_record() {
        let dir = TempDir::new().unwrap();
        let auth = Authenticator::new("V001", &config_in(&dir)).unwrap();
        assert!(auth.store().read_last_rotation().is_some());
        assert!(auth.rotation_state().last_rotation.is_some());
    }

    #[test]
    fn test_invalid_signature_denied_without_state_change() {
        let dir = TempDir::new().unwrap();
        let mut auth = Authenticator::new("V001", &config_in(&dir)).unwrap();
        let key_before = auth.public_key().unwrap();
        let state_before = auth.rotation_state();

        let challenge = auth.issue_challenge().unwrap();
        let stranger = PrivateKey::generate().unwrap();
        let forged = sign_base64(&challenge.message(), &stranger).unwrap();

        let outcome = auth.verify_response(&challenge.id(), &forged).unwrap();
        assert!(matches!(
            outcome,
            AuthOutcome::Denied(DenialReason::InvalidSignature)
        ));
        assert_eq!(auth.rotation_state(), state_before);
        assert_eq!(auth.public_key().unwrap(), key_before);
        assert_eq!(auth.state(), AuthState::Idle);
        assert_eq!(auth.last_result(), Some(false));
    }

    #[test]
    fn test_signature_over_other_challenge_denied() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.max_pending_challenges = 2;
        let mut auth = Authenticator::new("V001", &config).unwrap();

        let first = auth.issue_challenge().unwrap();
        let second = auth.issue_challenge().unwrap();
        let signature_for_first = answer(&auth, &first);

        let outcome = auth
            .verify_response(&second.id(), &signature_for_first)
            .unwrap();
        assert!(matches!(
            outcome,
            AuthOutcome::Denied(DenialReason::InvalidSignature)
        ));

        // The other pending challenge is still answerable
        let outcome = auth.verify_response(&first.id(), &signature_for_first).unwrap();
        assert!(outcome.is_granted());
    }

    #[test]
    fn test_new_challenge_supersedes_previous() {
        let dir = TempDir::new().unwrap();
        let mut auth = Authenticator::new("V001", &config_in(&dir)).unwrap();

        let stale = auth.issue_challenge().unwrap();
        let _fresh = auth.issue_challenge().unwrap();
        assert_eq!(auth.state(), AuthState::ChallengeIssued { pending: 1 });

        let signature = answer(&auth, &stale);
        let outcome = auth.verify_response(&stale.id(), &signature).unwrap();
        assert!(matches!(
            outcome,
            AuthOutcome::Denied(DenialReason::UnknownChallenge)
        ));
    }

    #[test]
    fn test_replayed_response_denied() {
        let dir = TempDir::new().unwrap();
        let mut auth = Authenticator::new("V001", &config_in(&dir)).unwrap();

        let challenge = auth.issue_challenge().unwrap();
        let signature = answer(&auth, &challenge);
        assert!(
            auth.verify_response(&challenge.id(), &signature)
                .unwrap()
                .is_granted()
        );

        let replay = auth.verify_response(&challenge.id(), &signature).unwrap();
        assert!(matches!(
            replay,
            AuthOutcome::Denied(DenialReason::ChallengeReplayed)
        ));
        assert_eq!(auth.rotation_state().auth_count, 1);
    }

    #[test]
    fn test_expired_challenge_denied() {
        let dir = TempDir::new().unwrap();
        let mut auth = Authenticator::new("V001", &config_in(&dir)).unwrap();

        let challenge = auth.issue_challenge().unwrap();
        let signature = answer(&auth, &challenge);
        let late = challenge.expires_at() + Duration::seconds(1);

        let outcome = auth
            .verify_response_at(&challenge.id(), &signature, late)
            .unwrap();
        assert!(matches!(
            outcome,
            AuthOutcome::Denied(DenialReason::ChallengeExpired)
        ));
        assert_eq!(auth.rotation_state().auth_count, 0);
    }

    #[test]
    fn test_malformed_signature_is_error_and_consumes_challenge() {
        let dir = TempDir::new().unwrap();
        let mut auth = Authenticator::new("V001", &config_in(&dir)).unwrap();

        let challenge = auth.issue_challenge().unwrap();
        let err = auth
            .verify_response(&challenge.id(), "%%% not base64 %%%")
            .unwrap_err();

        assert!(matches!(err, AuthError::Verification(_)));
        assert_eq!(auth.state(), AuthState::Idle);
        assert_eq!(auth.last_result(), Some(false));

        let signature = answer(&auth, &challenge);
        let retry = auth.verify_response(&challenge.id(), &signature).unwrap();
        assert!(matches!(
            retry,
            AuthOutcome::Denied(DenialReason::ChallengeReplayed)
        ));
    }

    #[test]
    fn test_rotation_after_threshold() {
        let dir = TempDir::new().unwrap();
        let mut auth = Authenticator::new("V001", &count_only_config(&dir, 5)).unwrap();
        let initial_key = auth.public_key().unwrap();

        for attempt in 1..=5 {
            let challenge = auth.issue_challenge().unwrap();
            let signature = answer(&auth, &challenge);
            let outcome = auth.verify_response(&challenge.id(), &signature).unwrap();

            let AuthOutcome::Granted { rotation, .. } = outcome else {
                panic!("attempt {} denied", attempt);
            };
            if attempt < 5 {
                assert!(rotation.is_none());
                assert_eq!(auth.public_key().unwrap(), initial_key);
            } else {
                let report = rotation.expect("rotation on fifth success");
                assert_eq!(report.trigger, RotationTrigger::UsageThreshold);
                assert_eq!(report.old_fingerprint, Some(initial_key.fingerprint()));
                assert_eq!(report.retired.map(|e| e.sequence), Some(1));
            }
        }

        assert_ne!(auth.public_key().unwrap(), initial_key);
        assert_eq!(auth.rotation_state().auth_count, 0);
        assert_eq!(auth.store().load_archive().unwrap().len(), 1);
    }

    #[test]
    fn test_time_based_rotation() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.rotation = RotationPolicy::time_based_only(3600);

        // Record says the key is two hours old
        let auth = Authenticator::new("V001", &config).unwrap();
        auth.store()
            .write_last_rotation(Utc::now() - Duration::hours(2))
            .unwrap();
        drop(auth);

        let mut auth = Authenticator::new("V001", &config).unwrap();
        let challenge = auth.issue_challenge().unwrap();
        let signature = answer(&auth, &challenge);

        let outcome = auth.verify_response(&challenge.id(), &signature).unwrap();
        let AuthOutcome::Granted {
            rotation: Some(report),
            ..
        } = outcome
        else {
            panic!("expected rotation");
        };
        assert_eq!(report.trigger, RotationTrigger::IntervalElapsed);
        assert_eq!(auth.rotation_state().auth_count, 0);
    }

    #[test]
    fn test_missing_rotation_record_forces_rotation() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let auth = Authenticator::new("V001", &config).unwrap();
        let record = auth.store().dir().join("last_rotation");
        drop(auth);
        fs::write(&record, "not a timestamp").unwrap();

        let mut auth = Authenticator::new("V001", &config).unwrap();
        assert_eq!(auth.rotation_state().last_rotation, None);

        let challenge = auth.issue_challenge().unwrap();
        let signature = answer(&auth, &challenge);
        let outcome = auth.verify_response(&challenge.id(), &signature).unwrap();

        let AuthOutcome::Granted {
            rotation: Some(report),
            ..
        } = outcome
        else {
            panic!("expected rotation");
        };
        assert_eq!(report.trigger, RotationTrigger::MissingRecord);
        assert!(auth.store().read_last_rotation().is_some());
    }

    #[test]
    fn test_grace_window_accepts_retired_key() {
        let dir = TempDir::new().unwrap();
        let mut auth = Authenticator::new("V001", &config_in(&dir)).unwrap();

        let challenge = auth.issue_challenge().unwrap();
        let signature = answer(&auth, &challenge);

        // Key rotates between signing and verification
        let report = auth.force_key_generation().unwrap();
        assert_eq!(report.trigger, RotationTrigger::Forced);

        let outcome = auth.verify_response(&challenge.id(), &signature).unwrap();
        assert!(matches!(
            outcome,
            AuthOutcome::Granted {
                matched: KeyMatch::Archived { sequence: 1 },
                ..
            }
        ));
    }

    #[test]
    fn test_corrupt_archive_entry_skipped_and_logged() {
        let dir = TempDir::new().unwrap();
        let logger = SecurityLogger::new("V001", Some(dir.path().join("logs"))).unwrap();
        let mut auth = Authenticator::with_collaborators(
            "V001",
            &config_in(&dir),
            Some(logger.clone()),
            None,
        )
        .unwrap();

        let challenge = auth.issue_challenge().unwrap();
        let signature = answer(&auth, &challenge);
        auth.force_key_generation().unwrap();
        auth.force_key_generation().unwrap();

        // Newest archive entry (sequence 2) becomes garbage
        let corrupt = auth
            .store()
            .load_archive()
            .unwrap()
            .into_iter()
            .find(|entry| entry.sequence == 2)
            .unwrap();
        fs::write(auth.store().archive_dir().join(corrupt.file_name()), "junk").unwrap();

        let outcome = auth.verify_response(&challenge.id(), &signature).unwrap();
        assert!(matches!(
            outcome,
            AuthOutcome::Granted {
                matched: KeyMatch::Archived { sequence: 1 },
                ..
            }
        ));

        let log = fs::read_to_string(logger.log_path()).unwrap();
        assert!(log.contains("ArchiveEntrySkipped"));
    }

    #[test]
    fn test_security_log_records_flow() {
        let dir = TempDir::new().unwrap();
        let logger = SecurityLogger::new("V001", Some(dir.path().join("logs"))).unwrap();
        let mut auth = Authenticator::with_collaborators(
            "V001",
            &count_only_config(&dir, 1),
            Some(logger.clone()),
            None,
        )
        .unwrap();

        let challenge = auth.issue_challenge().unwrap();
        let signature = answer(&auth, &challenge);
        auth.verify_response(&challenge.id(), &signature).unwrap();
        auth.verify_response(&challenge.id(), &signature).unwrap();

        let log = fs::read_to_string(logger.log_path()).unwrap();
        for event in [
            "KeyPairGenerated",
            "SystemStartup",
            "ChallengeIssued",
            "AuthenticationSucceeded",
            "KeyRotated",
            "AuthenticationFailed",
        ] {
            assert!(log.contains(event), "missing {}", event);
        }

        let result = verify_log_file(logger.log_path()).unwrap();
        assert!(result.verified, "{:?}", result.issues);
    }

    #[test]
    fn test_metrics_collected() {
        let dir = TempDir::new().unwrap();
        let metrics = PerformanceMetrics::shared();
        let mut auth = Authenticator::with_collaborators(
            "V001",
            &count_only_config(&dir, 1),
            None,
            Some(metrics.clone()),
        )
        .unwrap();

        let challenge = auth.issue_challenge().unwrap();
        let signature = answer(&auth, &challenge);
        auth.verify_response(&challenge.id(), &signature).unwrap();

        let m = metrics.lock().unwrap();
        assert_eq!(m.count(Operation::KeyGeneration), 1);
        assert_eq!(m.count(Operation::Sign), 1);
        assert_eq!(m.count(Operation::Verify), 1);
        assert_eq!(m.count(Operation::Rotation), 1);
        assert_eq!(m.e2e_latency_samples.len(), 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.nonce_length = 0;
        assert!(matches!(
            Authenticator::new("V001", &config),
            Err(AuthError::Config(_))
        ));
    }

    #[test]
    fn test_oversized_challenge_ttl_rejected_without_panic() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.challenge_ttl_secs = i64::MAX;
        assert!(matches!(
            Authenticator::new("V001", &config),
            Err(AuthError::Config(_))
        ));
    }

    #[test]
    fn test_corrupt_private_key_recovered_by_forced_rotation() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let auth = Authenticator::new("V001", &config).unwrap();
        fs::write(auth.store().private_key_path(), b"garbage").unwrap();
        drop(auth);

        let logger = SecurityLogger::new("V001", Some(dir.path().join("logs"))).unwrap();
        let mut auth =
            Authenticator::with_collaborators("V001", &config, Some(logger.clone()), None)
                .unwrap();
        assert!(matches!(
            auth.public_key(),
            Err(AuthError::CorruptKeyMaterial { .. })
        ));

        let report = auth.force_key_generation().unwrap();
        assert_eq!(report.trigger, RotationTrigger::Forced);
        assert!(report.old_fingerprint.is_none());
        assert!(report.retired.is_none());
        assert_eq!(auth.public_key().unwrap(), report.new_public_key);

        let challenge = auth.issue_challenge().unwrap();
        let signature = answer(&auth, &challenge);
        assert!(
            auth.verify_response(&challenge.id(), &signature)
                .unwrap()
                .is_granted()
        );

        let log = fs::read_to_string(logger.log_path()).unwrap();
        assert!(log.contains("KeyMaterialCorrupt"));
        assert!(!log.contains("SystemStartup"));
    }

    #[test]
    fn test_prune_failure_still_completes_rotation() {
        let dir = TempDir::new().unwrap();
        let mut config = count_only_config(&dir, 1);
        config.max_archived_keys = 1;
        let logger = SecurityLogger::new("V001", Some(dir.path().join("logs"))).unwrap();
        let mut auth =
            Authenticator::with_collaborators("V001", &config, Some(logger.clone()), None)
                .unwrap();
        fs::create_dir_all(auth.store().archive_dir().join("00000001-1700000000.pem")).unwrap();

        let challenge = auth.issue_challenge().unwrap();
        let signature = answer(&auth, &challenge);
        let AuthOutcome::Granted {
            rotation: Some(report),
            ..
        } = auth.verify_response(&challenge.id(), &signature).unwrap()
        else {
            panic!("expected rotation");
        };

        assert_eq!(report.prune_failures.len(), 1);
        assert_eq!(auth.rotation_state().auth_count, 0);
        assert_eq!(auth.public_key().unwrap(), report.new_public_key);

        let log = fs::read_to_string(logger.log_path()).unwrap();
        assert!(log.contains("ArchivePruneFailed"));
    }

    #[test]
    fn test_invalid_vehicle_id_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Authenticator::new("../V001", &config_in(&dir)),
            Err(AuthError::InvalidVehicleId(_))
        ));
    }
}
