// Keypair Store - durable per-vehicle key material
//
// Layout under <keys_dir>/<vehicle_id>/:
//   private.pem      PKCS#8 private key (authoritative)
//   public.pem       SPKI public key, always derived from private.pem
//   last_rotation    Unix seconds of the last activation
//   archive/         <sequence:08>-<retired_unix_secs>.pem, public halves only
//
// Every write goes to a temp file in the target directory, is fsynced, and is
// then renamed over the destination. On rotation the archive entry is written
// first, then private.pem, then public.pem. A crash between the two key
// renames is repaired on the next load because public.pem is re-derived.

use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::crypto::{Keypair, PrivateKey, PublicKey};
use super::errors::{AuthError, Result};

pub const PRIVATE_KEY_FILE: &str = "private.pem";
pub const PUBLIC_KEY_FILE: &str = "public.pem";
pub const LAST_ROTATION_FILE: &str = "last_rotation";
pub const ARCHIVE_DIR: &str = "archive";

/// Retired public keys kept for the grace window
pub const DEFAULT_MAX_ARCHIVED_KEYS: usize = 10;

/// Public half of a retired keypair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedKey {
    /// Monotonic archive position (1 = first key ever retired)
    pub sequence: u64,

    /// When the key stopped being active
    pub retired_at: DateTime<Utc>,

    public_key_pem: String,
}

impl ArchivedKey {
    pub fn from_pem(sequence: u64, retired_at: DateTime<Utc>, pem: impl Into<String>) -> Self {
        Self {
            sequence,
            retired_at,
            public_key_pem: pem.into(),
        }
    }

    pub fn from_public_key(
        sequence: u64,
        retired_at: DateTime<Utc>,
        key: &PublicKey,
    ) -> Result<Self> {
        Ok(Self::from_pem(sequence, retired_at, key.to_pem()?))
    }

    /// Parse the stored PEM; fails for corrupt entries
    pub fn public_key(&self) -> Result<PublicKey> {
        PublicKey::from_pem(&self.public_key_pem)
    }

    pub fn pem(&self) -> &str {
        &self.public_key_pem
    }

    pub fn file_name(&self) -> String {
        format!("{:08}-{}.pem", self.sequence, self.retired_at.timestamp())
    }

    fn parse_file_name(name: &str) -> Option<(u64, DateTime<Utc>)> {
        let stem = name.strip_suffix(".pem")?;
        let (sequence, secs) = stem.split_once('-')?;
        let sequence = sequence.parse().ok()?;
        let retired_at = DateTime::from_timestamp(secs.parse().ok()?, 0)?;
        Some((sequence, retired_at))
    }
}

/// Everything a rotation changed
#[derive(Debug, Clone)]
pub struct KeyRotation {
    /// Newly active keypair
    pub keypair: Keypair,

    /// Archive entry for the previous public key (None on first generation
    /// or when the previous key material was unreadable)
    pub retired: Option<ArchivedKey>,

    /// Archive sequences removed by pruning
    pub pruned: Vec<u64>,

    /// Pruning errors; the rotation itself still took effect
    pub prune_failures: Vec<String>,
}

/// File-backed owner of one vehicle's key material.
///
/// The store is a lightweight handle; several handles may point at the same
/// directory (vehicle and key fob do). Only `generate_and_activate` /
/// `rotate_at` replace the active pair.
#[derive(Debug, Clone)]
pub struct KeypairStore {
    vehicle_id: String,
    dir: PathBuf,
    max_archived_keys: usize,
}

impl KeypairStore {
    /// Open (creating directories as needed) the store for `vehicle_id`
    pub fn open(keys_dir: impl AsRef<Path>, vehicle_id: &str) -> Result<Self> {
        validate_vehicle_id(vehicle_id)?;

        let dir = keys_dir.as_ref().join(vehicle_id);
        let archive = dir.join(ARCHIVE_DIR);
        fs::create_dir_all(&archive).map_err(|e| AuthError::persistence(&archive, e))?;

        Ok(Self {
            vehicle_id: vehicle_id.to_string(),
            dir,
            max_archived_keys: DEFAULT_MAX_ARCHIVED_KEYS,
        })
    }

    /// Keep at most `max` archived public keys (newest win)
    pub fn with_max_archived_keys(mut self, max: usize) -> Self {
        self.max_archived_keys = max;
        self
    }

    pub fn vehicle_id(&self) -> &str {
        &self.vehicle_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn private_key_path(&self) -> PathBuf {
        self.dir.join(PRIVATE_KEY_FILE)
    }

    pub fn public_key_path(&self) -> PathBuf {
        self.dir.join(PUBLIC_KEY_FILE)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.dir.join(ARCHIVE_DIR)
    }

    fn rotation_record_path(&self) -> PathBuf {
        self.dir.join(LAST_ROTATION_FILE)
    }

    /// Whether an active private key has been persisted
    pub fn has_keys(&self) -> bool {
        self.private_key_path().is_file()
    }

    /// Load the active pair, generating and persisting one on first use
    pub fn ensure_keys_exist(&self) -> Result<Keypair> {
        if self.has_keys() {
            return self.load_active();
        }

        let keypair = Keypair::generate()?;
        self.write_active(&keypair)?;
        Ok(keypair)
    }

    /// Load the active pair. `public.pem` is rewritten if missing or stale.
    pub fn load_active(&self) -> Result<Keypair> {
        let private_path = self.private_key_path();
        let pem = fs::read_to_string(&private_path)
            .map_err(|e| AuthError::persistence(&private_path, e))?;
        let private = PrivateKey::from_pem(&pem).map_err(|e| AuthError::CorruptKeyMaterial {
            path: private_path.clone(),
            reason: e.to_string(),
        })?;
        let keypair = Keypair::from_private(private);

        let public_path = self.public_key_path();
        let on_disk = fs::read_to_string(&public_path)
            .ok()
            .and_then(|pem| PublicKey::from_pem(&pem).ok());
        if on_disk.as_ref() != Some(keypair.public()) {
            let staged = self.stage(keypair.public().to_pem()?.as_bytes())?;
            self.commit(staged, &public_path)?;
        }

        Ok(keypair)
    }

    /// Public half of the active pair
    pub fn public_key(&self) -> Result<PublicKey> {
        Ok(*self.load_active()?.public())
    }

    /// Hand the active private key to a signer (the vehicle's key fob)
    pub fn authorize_signer(&self) -> Result<PrivateKey> {
        Ok(self.load_active()?.private().clone())
    }

    /// Replace the active pair, archiving the previous public key
    pub fn generate_and_activate(&self) -> Result<Keypair> {
        Ok(self.rotate_at(Utc::now())?.keypair)
    }

    /// Rotation with an explicit retirement timestamp
    pub fn rotate_at(&self, now: DateTime<Utc>) -> Result<KeyRotation> {
        let previous = if self.has_keys() {
            match self.load_active() {
                Ok(keypair) => Some(keypair),
                // Unreadable old key: nothing to archive, replace it
                Err(AuthError::CorruptKeyMaterial { .. }) => None,
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        let keypair = Keypair::generate()?;
        let staged_private = self.stage(keypair.private().to_pem()?.as_bytes())?;
        let staged_public = self.stage(keypair.public().to_pem()?.as_bytes())?;

        let retired = match previous {
            Some(old) => Some(self.archive_public_key(old.public(), now)?),
            None => None,
        };

        self.commit(staged_private, &self.private_key_path())?;
        self.commit(staged_public, &self.public_key_path())?;

        let (pruned, prune_failures) = self.prune_archive();

        Ok(KeyRotation {
            keypair,
            retired,
            pruned,
            prune_failures,
        })
    }

    /// Archived public keys, newest first
    pub fn load_archive(&self) -> Result<Vec<ArchivedKey>> {
        let archive_dir = self.archive_dir();
        let entries = match fs::read_dir(&archive_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AuthError::persistence(&archive_dir, e)),
        };

        let mut archive = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| AuthError::persistence(&archive_dir, e))?;
            let name = entry.file_name();
            let Some((sequence, retired_at)) = name.to_str().and_then(ArchivedKey::parse_file_name)
            else {
                continue;
            };

            // Unreadable entries stay in the list so verification can report them
            let pem = fs::read(entry.path())
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default();
            archive.push(ArchivedKey::from_pem(sequence, retired_at, pem));
        }

        archive.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        Ok(archive)
    }

    /// Last persisted rotation time; `None` if missing or unparsable
    pub fn read_last_rotation(&self) -> Option<DateTime<Utc>> {
        let text = fs::read_to_string(self.rotation_record_path()).ok()?;
        let secs: i64 = text.trim().parse().ok()?;
        DateTime::from_timestamp(secs, 0)
    }

    pub fn write_last_rotation(&self, at: DateTime<Utc>) -> Result<()> {
        let staged = self.stage(at.timestamp().to_string().as_bytes())?;
        self.commit(staged, &self.rotation_record_path())
    }

    fn write_active(&self, keypair: &Keypair) -> Result<()> {
        let staged_private = self.stage(keypair.private().to_pem()?.as_bytes())?;
        let staged_public = self.stage(keypair.public().to_pem()?.as_bytes())?;
        self.commit(staged_private, &self.private_key_path())?;
        self.commit(staged_public, &self.public_key_path())
    }

    fn archive_public_key(&self, key: &PublicKey, retired_at: DateTime<Utc>) -> Result<ArchivedKey> {
        let sequence = self
            .load_archive()?
            .first()
            .map_or(1, |newest| newest.sequence + 1);
        let entry = ArchivedKey::from_public_key(sequence, retired_at, key)?;

        let path = self.archive_dir().join(entry.file_name());
        let staged = self.stage_in(&self.archive_dir(), entry.pem().as_bytes())?;
        self.commit(staged, &path)?;
        Ok(entry)
    }

    // Best effort: runs after the new key is committed
    fn prune_archive(&self) -> (Vec<u64>, Vec<String>) {
        let archive = match self.load_archive() {
            Ok(archive) => archive,
            Err(e) => return (Vec::new(), vec![e.to_string()]),
        };

        let mut pruned = Vec::new();
        let mut failures = Vec::new();
        for entry in archive.iter().skip(self.max_archived_keys) {
            let path = self.archive_dir().join(entry.file_name());
            match fs::remove_file(&path) {
                Ok(()) => pruned.push(entry.sequence),
                Err(e) => failures.push(AuthError::persistence(&path, e).to_string()),
            }
        }

        (pruned, failures)
    }

    fn stage(&self, contents: &[u8]) -> Result<NamedTempFile> {
        self.stage_in(&self.dir, contents)
    }

    // Temp file is deleted on drop if never committed
    fn stage_in(&self, dir: &Path, contents: &[u8]) -> Result<NamedTempFile> {
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| AuthError::persistence(dir, e))?;
        tmp.write_all(contents)
            .and_then(|_| tmp.flush())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| AuthError::persistence(tmp.path(), e))?;
        Ok(tmp)
    }

    fn commit(&self, staged: NamedTempFile, dest: &Path) -> Result<()> {
        staged
            .persist(dest)
            .map_err(|e| AuthError::persistence(dest, e.error))?;

        // Best effort: make the rename itself durable
        if let Some(parent) = dest.parent()
            && let Ok(dir) = File::open(parent)
        {
            let _ = dir.sync_all();
        }
        Ok(())
    }
}

/// Vehicle ids become directory names: ASCII alphanumerics, `-` and `_` only
pub fn validate_vehicle_id(vehicle_id: &str) -> Result<()> {
    let valid = !vehicle_id.is_empty()
        && vehicle_id.len() <= 64
        && vehicle_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AuthError::InvalidVehicleId(vehicle_id.to_string()))
    }
}
