/// Regression tests for the vehicle/key fob authentication flow
///
/// These tests drive the public API end to end:
/// - Legitimate key fob responses are granted
/// - Tampered or foreign responses are denied
/// - Keys rotate after the usage threshold, and the retired key stays
///   usable through the archive
use std::fs;

use tempfile::TempDir;
use vehicle_key_auth::hsm::crypto::{sign_base64, verify};
use vehicle_key_auth::{
    AuthConfig, AuthOutcome, Authenticator, DenialReason, KeyFob, KeyMatch, KeypairStore,
    RotationPolicy, RotationTrigger,
};

fn config_in(dir: &TempDir) -> AuthConfig {
    AuthConfig {
        keys_dir: dir.path().join("keys"),
        rotation: RotationPolicy::counter_based_only(5),
        ..AuthConfig::default()
    }
}

fn round(auth: &mut Authenticator) -> AuthOutcome {
    let challenge = auth.issue_challenge().unwrap();
    let signature = auth.pair_key_fob().sign_challenge(&challenge.id()).unwrap();
    auth.verify_response(&challenge.id(), &signature).unwrap()
}

#[test]
fn test_end_to_end_scenario() {
    let dir = TempDir::new().unwrap();
    let store = KeypairStore::open(dir.path(), "V001").unwrap();
    let k0 = store.ensure_keys_exist().unwrap();

    let mut auth = Authenticator::new(
        "V001",
        &AuthConfig {
            keys_dir: dir.path().to_path_buf(),
            ..AuthConfig::default()
        },
    )
    .unwrap();
    let challenge = auth.issue_challenge().unwrap();

    let fob = KeyFob::new(dir.path(), "V001").unwrap();
    let signature = fob.sign_challenge(&challenge.id()).unwrap();

    assert!(verify(&challenge.message(), &signature, k0.public(), &[]).unwrap());

    // Appending one byte to the raw signature makes it invalid
    use base64::Engine as _;
    let engine = base64::engine::general_purpose::STANDARD;
    let mut raw = engine.decode(&signature).unwrap();
    raw.push(0x00);
    let extended = engine.encode(&raw);
    assert!(!verify(&challenge.message(), &extended, k0.public(), &[]).unwrap());

    let outcome = auth.verify_response(&challenge.id(), &extended).unwrap();
    assert!(matches!(
        outcome,
        AuthOutcome::Denied(DenialReason::InvalidSignature)
    ));
}

#[test]
fn test_rotation_after_five_successes() {
    let dir = TempDir::new().unwrap();
    let mut auth = Authenticator::new("V001", &config_in(&dir)).unwrap();
    let before = auth.public_key().unwrap();

    let outcomes: Vec<AuthOutcome> = (0..6).map(|_| round(&mut auth)).collect();
    assert!(outcomes.iter().all(AuthOutcome::is_granted));

    let rotations: Vec<usize> = outcomes
        .iter()
        .enumerate()
        .filter_map(|(i, outcome)| match outcome {
            AuthOutcome::Granted {
                rotation: Some(report),
                ..
            } => {
                assert_eq!(report.trigger, RotationTrigger::UsageThreshold);
                Some(i)
            }
            _ => None,
        })
        .collect();
    assert_eq!(rotations, vec![4]);

    assert_ne!(auth.public_key().unwrap(), before);
    assert_eq!(auth.rotation_state().auth_count, 1);

    let archive = auth.store().load_archive().unwrap();
    assert_eq!(archive.len(), 1);
    assert_eq!(archive[0].public_key().unwrap(), before);
}

#[test]
fn test_late_response_accepted_after_rotation() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir);
    config.max_pending_challenges = 2;
    let mut auth = Authenticator::new("V001", &config).unwrap();

    for _ in 0..4 {
        assert!(round(&mut auth).is_granted());
    }

    // Signed under the old key, answered only after the fifth success rotated it
    let slow = auth.issue_challenge().unwrap();
    let slow_signature = auth.pair_key_fob().sign_challenge(&slow.id()).unwrap();

    let AuthOutcome::Granted {
        rotation: Some(report),
        ..
    } = round(&mut auth)
    else {
        panic!("fifth success should rotate");
    };
    let retired = report.retired.expect("old key archived");

    let outcome = auth.verify_response(&slow.id(), &slow_signature).unwrap();
    assert!(matches!(
        outcome,
        AuthOutcome::Granted {
            matched: KeyMatch::Archived { sequence },
            rotation: None,
        } if sequence == retired.sequence
    ));
}

#[test]
fn test_vehicles_are_isolated() {
    let dir = TempDir::new().unwrap();
    let mut v1 = Authenticator::new("V001", &config_in(&dir)).unwrap();
    let v2 = Authenticator::new("V002", &config_in(&dir)).unwrap();

    let challenge = v1.issue_challenge().unwrap();
    let wrong_signature = v2.pair_key_fob().sign_challenge(&challenge.id()).unwrap();

    let outcome = v1.verify_response(&challenge.id(), &wrong_signature).unwrap();
    assert!(matches!(
        outcome,
        AuthOutcome::Denied(DenialReason::InvalidSignature)
    ));
}

#[test]
fn test_restart_keeps_keys() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    let first = Authenticator::new("V001", &config).unwrap();
    let key = first.public_key().unwrap();
    let private_pem = fs::read(first.store().private_key_path()).unwrap();
    drop(first);

    let mut second = Authenticator::new("V001", &config).unwrap();
    assert_eq!(second.public_key().unwrap(), key);
    assert_eq!(
        fs::read(second.store().private_key_path()).unwrap(),
        private_pem
    );
    assert!(round(&mut second).is_granted());
}

#[test]
fn test_archive_pruned_to_limit() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir);
    config.max_archived_keys = 2;
    let mut auth = Authenticator::new("V001", &config).unwrap();

    let mut pruned = Vec::new();
    for _ in 0..4 {
        pruned.extend(auth.force_key_generation().unwrap().pruned);
    }

    let sequences: Vec<u64> = auth
        .store()
        .load_archive()
        .unwrap()
        .iter()
        .map(|entry| entry.sequence)
        .collect();
    assert_eq!(sequences, vec![4, 3]);
    assert_eq!(pruned, vec![1, 2]);
}

#[test]
fn test_signature_from_discarded_private_key_rejected_after_pruning() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir);
    config.max_archived_keys = 1;
    let mut auth = Authenticator::new("V001", &config).unwrap();

    let old_key = auth.store().authorize_signer().unwrap();
    auth.force_key_generation().unwrap();
    auth.force_key_generation().unwrap();

    let challenge = auth.issue_challenge().unwrap();
    let signature = sign_base64(&challenge.message(), &old_key).unwrap();
    let outcome = auth.verify_response(&challenge.id(), &signature).unwrap();
    assert!(matches!(
        outcome,
        AuthOutcome::Denied(DenialReason::InvalidSignature)
    ));
}
