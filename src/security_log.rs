/// Security Event Logging Module
///
/// Provides a tamper-evident audit trail of key lifecycle and authentication
/// events using chained hashing. Each log entry includes a hash of the
/// previous entry, making it detectable if entries are modified or deleted.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::hsm::{AuthError, Result};

/// Types of security events to log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum SecurityEvent {
    /// Authenticator started with an active keypair
    SystemStartup {
        vehicle_id: String,
        key_fingerprint: String,
    },

    /// First keypair for this vehicle generated
    KeyPairGenerated { fingerprint: String },

    /// Challenge handed to a key fob
    ChallengeIssued {
        challenge_id: String,
        expires_at: DateTime<Utc>,
    },

    AuthenticationSucceeded {
        challenge_id: String,
        matched_key: String,
        auth_count: u64,
    },

    AuthenticationFailed { challenge_id: String, reason: String },

    /// Active keypair replaced
    KeyRotated {
        trigger: String,
        old_fingerprint: Option<String>,
        new_fingerprint: String,
        archived_sequence: Option<u64>,
    },

    /// Corrupt archive entry passed over during verification
    ArchiveEntrySkipped { sequence: u64, reason: String },

    /// Archive entries removed beyond the retention limit
    ArchivePruned { sequences: Vec<u64> },

    /// Archive entry left behind after a rotation
    ArchivePruneFailed { reason: String },

    /// Active private key unreadable at startup
    KeyMaterialCorrupt { path: String, reason: String },
}

impl SecurityEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SecurityEvent::SystemStartup { .. } => "SystemStartup",
            SecurityEvent::KeyPairGenerated { .. } => "KeyPairGenerated",
            SecurityEvent::ChallengeIssued { .. } => "ChallengeIssued",
            SecurityEvent::AuthenticationSucceeded { .. } => "AuthenticationSucceeded",
            SecurityEvent::AuthenticationFailed { .. } => "AuthenticationFailed",
            SecurityEvent::KeyRotated { .. } => "KeyRotated",
            SecurityEvent::ArchiveEntrySkipped { .. } => "ArchiveEntrySkipped",
            SecurityEvent::ArchivePruned { .. } => "ArchivePruned",
            SecurityEvent::ArchivePruneFailed { .. } => "ArchivePruneFailed",
            SecurityEvent::KeyMaterialCorrupt { .. } => "KeyMaterialCorrupt",
        }
    }
}

/// A single entry in the security log with tamper-resistant chaining
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityLogEntry {
    /// Sequential entry number
    pub sequence: u64,

    /// Timestamp of the event
    pub timestamp: DateTime<Utc>,

    /// Vehicle that generated this log entry
    pub vehicle_id: String,

    /// The security event
    pub event: SecurityEvent,

    /// Hash of the previous log entry (empty for first entry)
    pub prev_hash: String,

    /// Hash of this entry (for chain verification)
    pub entry_hash: String,
}

impl SecurityLogEntry {
    /// Create a new log entry with chained hash
    fn new(sequence: u64, vehicle_id: String, event: SecurityEvent, prev_hash: String) -> Self {
        let timestamp = Utc::now();
        let entry_hash = Self::compute_hash(sequence, &timestamp, &vehicle_id, &event, &prev_hash);

        Self {
            sequence,
            timestamp,
            vehicle_id,
            event,
            prev_hash,
            entry_hash,
        }
    }

    fn compute_hash(
        sequence: u64,
        timestamp: &DateTime<Utc>,
        vehicle_id: &str,
        event: &SecurityEvent,
        prev_hash: &str,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(sequence.to_le_bytes());
        hasher.update(timestamp.to_rfc3339().as_bytes());
        hasher.update(vehicle_id.as_bytes());
        hasher.update(serde_json::to_string(event).unwrap_or_default().as_bytes());
        hasher.update(prev_hash.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Verify this entry's hash is correct
    pub fn verify_hash(&self) -> bool {
        let expected = Self::compute_hash(
            self.sequence,
            &self.timestamp,
            &self.vehicle_id,
            &self.event,
            &self.prev_hash,
        );
        expected == self.entry_hash
    }

    /// Verify chain link to previous entry
    pub fn verify_chain(&self, prev_entry: &SecurityLogEntry) -> bool {
        self.prev_hash == prev_entry.entry_hash && self.sequence == prev_entry.sequence + 1
    }
}

/// Mutable tail of the chain, guarded as one unit
struct ChainState {
    writer: BufWriter<File>,
    sequence: u64,
    last_hash: String,
}

/// Security logger with tamper-evident audit trail
#[derive(Clone)]
pub struct SecurityLogger {
    vehicle_id: String,
    log_path: PathBuf,
    chain: Arc<Mutex<ChainState>>,
}

impl SecurityLogger {
    /// Create a logger writing to `<log_dir>/<vehicle_id>_<timestamp>.jsonl`
    /// (default directory: `./security_logs/`)
    pub fn new(vehicle_id: &str, log_dir: Option<PathBuf>) -> Result<Self> {
        let log_dir = log_dir.unwrap_or_else(|| PathBuf::from("security_logs"));
        fs::create_dir_all(&log_dir).map_err(|e| AuthError::persistence(&log_dir, e))?;

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let log_path = log_dir.join(format!("{}_{}.jsonl", vehicle_id, timestamp));

        Self::open(vehicle_id, log_path)
    }

    /// Open (or continue) a log at an explicit path.
    ///
    /// If the file already holds entries, new entries extend its chain.
    pub fn open(vehicle_id: &str, log_path: PathBuf) -> Result<Self> {
        let (sequence, last_hash) = match read_entries(&log_path) {
            Ok(entries) => entries
                .last()
                .and_then(|last| last.as_ref().ok())
                .map(|last| (last.sequence + 1, last.entry_hash.clone()))
                .unwrap_or((0, String::new())),
            Err(_) => (0, String::new()),
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| AuthError::persistence(&log_path, e))?;

        Ok(Self {
            vehicle_id: vehicle_id.to_string(),
            log_path,
            chain: Arc::new(Mutex::new(ChainState {
                writer: BufWriter::new(file),
                sequence,
                last_hash,
            })),
        })
    }

    /// Log a security event. Fire-and-forget: I/O problems are ignored.
    pub fn log_event(&self, event: SecurityEvent) {
        let Ok(mut chain) = self.chain.lock() else {
            return;
        };

        let entry = SecurityLogEntry::new(
            chain.sequence,
            self.vehicle_id.clone(),
            event,
            chain.last_hash.clone(),
        );

        // JSONL format - one JSON object per line
        if let Ok(json) = serde_json::to_string(&entry) {
            let _ = writeln!(chain.writer, "{}", json);
            let _ = chain.writer.flush();
        }

        chain.sequence += 1;
        chain.last_hash = entry.entry_hash;
    }

    pub fn log_startup(&self, key_fingerprint: String) {
        self.log_event(SecurityEvent::SystemStartup {
            vehicle_id: self.vehicle_id.clone(),
            key_fingerprint,
        });
    }

    pub fn log_keypair_generated(&self, fingerprint: String) {
        self.log_event(SecurityEvent::KeyPairGenerated { fingerprint });
    }

    pub fn log_challenge_issued(&self, challenge_id: String, expires_at: DateTime<Utc>) {
        self.log_event(SecurityEvent::ChallengeIssued {
            challenge_id,
            expires_at,
        });
    }

    pub fn log_auth_success(&self, challenge_id: String, matched_key: String, auth_count: u64) {
        self.log_event(SecurityEvent::AuthenticationSucceeded {
            challenge_id,
            matched_key,
            auth_count,
        });
    }

    pub fn log_auth_failure(&self, challenge_id: String, reason: String) {
        self.log_event(SecurityEvent::AuthenticationFailed {
            challenge_id,
            reason,
        });
    }

    pub fn log_key_rotated(
        &self,
        trigger: String,
        old_fingerprint: Option<String>,
        new_fingerprint: String,
        archived_sequence: Option<u64>,
    ) {
        self.log_event(SecurityEvent::KeyRotated {
            trigger,
            old_fingerprint,
            new_fingerprint,
            archived_sequence,
        });
    }

    pub fn log_archive_entry_skipped(&self, sequence: u64, reason: String) {
        self.log_event(SecurityEvent::ArchiveEntrySkipped { sequence, reason });
    }

    pub fn log_archive_pruned(&self, sequences: Vec<u64>) {
        self.log_event(SecurityEvent::ArchivePruned { sequences });
    }

    pub fn log_archive_prune_failed(&self, reason: String) {
        self.log_event(SecurityEvent::ArchivePruneFailed { reason });
    }

    pub fn log_key_material_corrupt(&self, path: String, reason: String) {
        self.log_event(SecurityEvent::KeyMaterialCorrupt { path, reason });
    }

    /// Get the log file path
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Number of the next entry (entries written so far, for a fresh log)
    pub fn sequence(&self) -> u64 {
        self.chain.lock().map(|chain| chain.sequence).unwrap_or(0)
    }
}

impl fmt::Debug for SecurityLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityLogger")
            .field("vehicle_id", &self.vehicle_id)
            .field("log_path", &self.log_path)
            .field("sequence", &self.sequence())
            .finish()
    }
}

/// Parse every line; each line is an entry or its parse error message
fn read_entries(log_path: &Path) -> Result<Vec<std::result::Result<SecurityLogEntry, String>>> {
    let file = File::open(log_path).map_err(|e| AuthError::persistence(log_path, e))?;
    let reader = BufReader::new(file);

    let mut entries = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| AuthError::persistence(log_path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(
            serde_json::from_str::<SecurityLogEntry>(&line)
                .map_err(|e| format!("Line {} parse error: {}", line_num + 1, e)),
        );
    }
    Ok(entries)
}

/// Verify integrity of an entire log file
pub fn verify_log_file(log_path: &Path) -> Result<LogVerificationResult> {
    let mut issues = Vec::new();
    let mut entries = Vec::new();
    for parsed in read_entries(log_path)? {
        match parsed {
            Ok(entry) => entries.push(entry),
            Err(e) => issues.push(e),
        }
    }

    if let Some(first) = entries.first()
        && !first.prev_hash.is_empty()
    {
        issues.push(format!(
            "Entry 0: First entry should have empty prev_hash, got '{}'",
            first.prev_hash
        ));
    }

    for (i, entry) in entries.iter().enumerate() {
        if !entry.verify_hash() {
            issues.push(format!("Entry {}: Hash verification failed (tampered)", i));
        }
    }

    for i in 1..entries.len() {
        if !entries[i].verify_chain(&entries[i - 1]) {
            issues.push(format!(
                "Entry {}: Chain verification failed (missing or reordered entry)",
                i
            ));
        }
    }

    for (i, entry) in entries.iter().enumerate() {
        if entry.sequence != i as u64 {
            issues.push(format!(
                "Entry {}: Expected sequence {}, got {}",
                i, i, entry.sequence
            ));
        }
    }

    Ok(LogVerificationResult {
        total_entries: entries.len(),
        verified: issues.is_empty(),
        issues,
    })
}

/// Result of log verification
#[derive(Debug)]
pub struct LogVerificationResult {
    pub total_entries: usize,
    pub verified: bool,
    pub issues: Vec<String>,
}
