// ECDSA P-256 primitives: key types, signing, verification with archive fallback.
//
// Signing uses RFC 6979 deterministic nonces (SHA-256), so the same key and
// message always produce the same signature. Nothing in this module logs,
// times or touches the filesystem.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;

use super::errors::{AuthError, Result};
use super::keypair_store::ArchivedKey;

/// Raw `r || s` signature width for P-256
pub const SIGNATURE_LENGTH: usize = 64;

/// P-256 private scalar. Debug output never shows key material.
#[derive(Clone)]
pub struct PrivateKey(SigningKey);

impl PrivateKey {
    /// Generate a fresh private key from the OS CSPRNG
    pub fn generate() -> Result<Self> {
        let mut rng = rand::rngs::OsRng;
        loop {
            let mut bytes = p256::FieldBytes::default();
            rng.try_fill_bytes(bytes.as_mut_slice())
                .map_err(|e| AuthError::EntropySource(e.to_string()))?;

            // Zero or >= n scalars are astronomically rare; draw again
            if let Ok(key) = SigningKey::from_bytes(&bytes) {
                return Ok(Self(key));
            }
        }
    }

    /// Decode a PKCS#8 PEM private key, also accepting SEC1 `EC PRIVATE KEY`
    pub fn from_pem(pem: &str) -> Result<Self> {
        let secret = match p256::SecretKey::from_pkcs8_pem(pem) {
            Ok(secret) => secret,
            Err(pkcs8_err) => p256::SecretKey::from_sec1_pem(pem).map_err(|_| {
                AuthError::Signing(format!("private key is not valid P-256 PEM: {pkcs8_err}"))
            })?,
        };
        Ok(Self(SigningKey::from(secret)))
    }

    pub fn to_pem(&self) -> Result<String> {
        let pem = self
            .0
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AuthError::Signing(format!("PKCS#8 encoding failed: {e}")))?;
        Ok(pem.to_string())
    }

    /// Public key derived from this scalar
    pub fn public_key(&self) -> PublicKey {
        PublicKey(*self.0.verifying_key())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("public", &self.public_key().fingerprint())
            .finish_non_exhaustive()
    }
}

/// P-256 public point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    /// Decode an SPKI (`PUBLIC KEY`) PEM block
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = p256::PublicKey::from_public_key_pem(pem)
            .map_err(|e| AuthError::Verification(format!("public key is not valid P-256 PEM: {e}")))?;
        Ok(Self(VerifyingKey::from(key)))
    }

    pub fn to_pem(&self) -> Result<String> {
        p256::PublicKey::from(&self.0)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AuthError::Verification(format!("SPKI encoding failed: {e}")))
    }

    /// SHA-256 over the SEC1 point, hex encoded
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.0.to_sec1_bytes()))
    }

    /// First 16 hex characters of the fingerprint, for logs and console output
    pub fn short_fingerprint(&self) -> String {
        self.fingerprint()[..16].to_string()
    }

    fn accepts(&self, message: &[u8], signature: &Signature) -> bool {
        self.0.verify(message, signature).is_ok()
    }
}

/// Active signing keypair. The public half is always derived from the
/// private half; there is no constructor that takes both.
#[derive(Clone)]
pub struct Keypair {
    private: PrivateKey,
    public: PublicKey,
}

impl Keypair {
    pub fn generate() -> Result<Self> {
        Ok(Self::from_private(PrivateKey::generate()?))
    }

    pub fn from_private(private: PrivateKey) -> Self {
        let public = private.public_key();
        Self { private, public }
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    // Only the keypair store hands this out
    pub(crate) fn private(&self) -> &PrivateKey {
        &self.private
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &self.public.short_fingerprint())
            .finish_non_exhaustive()
    }
}

/// Sign `message` with `key`
pub fn sign(message: &[u8], key: &PrivateKey) -> Result<Signature> {
    let signature: Signature = key
        .0
        .try_sign(message)
        .map_err(|e| AuthError::Signing(e.to_string()))?;
    Ok(signature)
}

/// Sign and encode for the wire (standard base64 of `r || s`)
pub fn sign_base64(message: &[u8], key: &PrivateKey) -> Result<String> {
    let signature = sign(message, key)?;
    Ok(BASE64.encode(signature.to_bytes()))
}

/// Which key accepted a signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMatch {
    Current,
    Archived { sequence: u64 },
}

impl fmt::Display for KeyMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMatch::Current => write!(f, "current key"),
            KeyMatch::Archived { sequence } => write!(f, "archived key #{}", sequence),
        }
    }
}

/// Archive entry that could not be used during verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedArchiveEntry {
    pub sequence: u64,
    pub reason: String,
}

/// Result of a verification pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationOutcome {
    /// `None` when every key rejected the signature
    pub matched: Option<KeyMatch>,

    /// Corrupt archive entries passed over on the way
    pub skipped: Vec<SkippedArchiveEntry>,
}

impl VerificationOutcome {
    pub fn is_valid(&self) -> bool {
        self.matched.is_some()
    }
}

/// Verify a base64 signature against the current key, then the archive.
pub fn verify(
    message: &[u8],
    signature_b64: &str,
    current: &PublicKey,
    archive: &[ArchivedKey],
) -> Result<bool> {
    Ok(verify_detailed(message, signature_b64, current, archive)?.is_valid())
}

/// Like [`verify`], reporting which key matched and which archive entries
/// were skipped as corrupt.
///
/// Text that is not base64 is malformed input and returns `Err`. Decoded
/// bytes that are not a well-formed P-256 signature (wrong length, zero or
/// out-of-range scalars) are treated as a rejected signature, not an error.
/// The archive is walked in the order given; the keypair store supplies it
/// newest-first.
pub fn verify_detailed(
    message: &[u8],
    signature_b64: &str,
    current: &PublicKey,
    archive: &[ArchivedKey],
) -> Result<VerificationOutcome> {
    let bytes = BASE64
        .decode(signature_b64.trim())
        .map_err(|e| AuthError::Verification(format!("signature is not valid base64: {e}")))?;

    let mut outcome = VerificationOutcome::default();

    let Ok(signature) = Signature::from_slice(&bytes) else {
        return Ok(outcome);
    };

    if current.accepts(message, &signature) {
        outcome.matched = Some(KeyMatch::Current);
        return Ok(outcome);
    }

    for entry in archive {
        match entry.public_key() {
            Ok(key) => {
                if key.accepts(message, &signature) {
                    outcome.matched = Some(KeyMatch::Archived {
                        sequence: entry.sequence,
                    });
                    return Ok(outcome);
                }
            }
            Err(e) => outcome.skipped.push(SkippedArchiveEntry {
                sequence: entry.sequence,
                reason: e.to_string(),
            }),
        }
    }

    Ok(outcome)
}
