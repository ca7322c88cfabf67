// Key lifecycle core: entropy, key material, rotation policy and
// the stateless sign/verify primitives

pub mod crypto;
pub mod errors;
pub mod key_rotation;
pub mod keypair_store;
pub mod nonce;
pub mod performance;
pub mod replay;

pub use crypto::{
    KeyMatch, Keypair, PrivateKey, PublicKey, SkippedArchiveEntry, VerificationOutcome, sign,
    sign_base64, verify, verify_detailed,
};
pub use errors::{AuthError, DenialReason, Result};
pub use key_rotation::{RotationPolicy, RotationState, RotationTrigger};
pub use keypair_store::{ArchivedKey, KeyRotation, KeypairStore, validate_vehicle_id};
pub use nonce::{Challenge, NonceGenerator, RngConfig};
pub use performance::{Operation, PerformanceMetrics, PerformanceSnapshot, SharedMetrics, track};
pub use replay::ConsumedChallenges;

// Cross-module tests
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn test_challenge_signed_by_store_key_verifies() {
        let dir = TempDir::new().unwrap();
        let store = KeypairStore::open(dir.path(), "V001").unwrap();
        let keypair = store.ensure_keys_exist().unwrap();

        let mut generator = NonceGenerator::new(16).unwrap();
        let challenge = generator.generate_challenge().unwrap();

        let signer = store.authorize_signer().unwrap();
        let signature = sign_base64(&challenge.message(), &signer).unwrap();

        assert!(verify(&challenge.message(), &signature, keypair.public(), &[]).unwrap());
    }

    #[test]
    fn test_rotation_grace_via_archive() {
        let dir = TempDir::new().unwrap();
        let store = KeypairStore::open(dir.path(), "V001").unwrap();
        store.ensure_keys_exist().unwrap();

        let message = b"0123456789abcdef";
        let old_signature = sign_base64(message, &store.authorize_signer().unwrap()).unwrap();

        let rotation = store.rotate_at(Utc::now()).unwrap();
        let archive = store.load_archive().unwrap();
        let current = *rotation.keypair.public();

        let outcome = verify_detailed(message, &old_signature, &current, &archive).unwrap();
        assert!(outcome.is_valid());
        assert!(matches!(outcome.matched, Some(KeyMatch::Archived { .. })));

        // Without the archive the retired key's signature is rejected
        assert!(!verify(message, &old_signature, &current, &[]).unwrap());
    }

    #[test]
    fn test_policy_drives_store_rotation() {
        let dir = TempDir::new().unwrap();
        let store = KeypairStore::open(dir.path(), "V001").unwrap();
        let before = *store.ensure_keys_exist().unwrap().public();

        let policy = RotationPolicy::counter_based_only(2);
        let now = Utc::now();
        let mut state = RotationState::new(Some(now));
        state.record_success();
        assert!(!policy.should_rotate(&state, now));
        state.record_success();
        assert!(policy.should_rotate(&state, now));

        let rotation = store.rotate_at(now).unwrap();
        state.reset(now);
        assert_ne!(*rotation.keypair.public(), before);
        assert_eq!(state.auth_count, 0);
    }
}
