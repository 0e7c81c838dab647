//! The mutable, lockable, backed-up operational configuration store (§4.10).
//!
//! Distinct from [`crate::config`], which loads the process's own
//! bootstrap configuration once at start-up via figment. This module owns
//! a line-oriented `KEY=VALUE` file (`config/.env` by default) that admin
//! operators and `gatewayctl` mutate at runtime: `TOKEN_HMAC_SECRET`,
//! `KEK_BASE64`, `UPSTREAM_MODE`, feature flags, and anything else an
//! operator needs to change without a restart. Every mutation is
//! checksummed, backed up, and protected by an exclusive file lock so
//! concurrent writers (an admin request and a `gatewayctl` invocation,
//! say) never interleave.

mod env_format;
mod lock;

pub use env_format::{format_env_file, parse_env_file};
pub use lock::{FileLock, LockGuard};

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::registry::ConfigMap;

/// Keys every `.env` file must carry; written first, in this order, by
/// [`format_env_file`] (§4.10: "required keys first, then flags, then
/// extra keys appended").
pub const REQUIRED_KEYS: &[&str] = &[
    "PORT",
    "DATABASE_URL",
    "REDIS_URL",
    "TOKEN_HMAC_SECRET",
    "SECRETS_BACKEND",
    "HTTP_TIMEOUT_MS",
    "DEFAULT_TIMEZONE",
    "KEK_BASE64",
];

/// Keys written immediately after [`REQUIRED_KEYS`], before any
/// caller-defined extras.
pub const FLAG_KEYS: &[&str] = &["UPSTREAM_MODE", "CHAOS_ENABLED", "DEMO_MODE"];

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Metadata recorded alongside every backup, serialized as sibling JSON
/// (`config/.env-backups/<id>.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub checksum: u64,
    pub size: u64,
}

/// Contents of a lock file (`config/.env-locks/<lockid>.lock`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockFile {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub pid: u32,
}

/// Owns the live `.env` file plus its backups and locks directories.
///
/// Readers ([`ConfigManager::read_config`]) take no lock: they read
/// whatever the atomic rename last published. Writers
/// ([`ConfigManager::update_config`], [`ConfigManager::rollback_config`])
/// serialize through [`FileLock`].
pub struct ConfigManager {
    env_path: PathBuf,
    backups_dir: PathBuf,
    locks_dir: PathBuf,
    lock_timeout: Duration,
}

impl ConfigManager {
    /// Open a config manager rooted at `env_path` (typically
    /// `config/.env`). Backups live in a sibling `.env-backups/` directory,
    /// locks in `.env-locks/`; both are created if missing.
    pub fn open(env_path: impl Into<PathBuf>) -> Result<Self> {
        let env_path = env_path.into();
        let root = env_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let backups_dir = root.join(".env-backups");
        let locks_dir = root.join(".env-locks");

        fs::create_dir_all(&root)?;
        fs::create_dir_all(&backups_dir)?;
        fs::create_dir_all(&locks_dir)?;

        if !env_path.exists() {
            fs::write(&env_path, format_env_file(&ConfigMap::new()))?;
        }

        Ok(Self {
            env_path,
            backups_dir,
            locks_dir,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// `readConfig()` — parse the live file into a key/value mapping.
    pub fn read_config(&self) -> Result<ConfigMap> {
        let contents = fs::read_to_string(&self.env_path)?;
        parse_env_file(&contents).map_err(Error::ConfigManager)
    }

    /// `updateConfig(changes, reason)` (§4.10).
    ///
    /// Acquires an exclusive lock, snapshots the current file to a
    /// checksummed backup, applies `changes` on top of the current
    /// mapping, re-serializes deterministically, and atomically renames
    /// the result over the live file. If `validate` rejects the merged
    /// mapping, the just-created backup is restored and the validation
    /// error is surfaced — the live file is never left half-written.
    pub fn update_config(
        &self,
        changes: HashMap<String, String>,
        reason: &str,
        validate: impl FnOnce(&ConfigMap) -> std::result::Result<(), String>,
    ) -> Result<BackupMetadata> {
        let _guard = self.lock("update_config")?;

        let mut current = self.read_config()?;
        let backup = self.create_backup_locked(reason)?;

        for (key, value) in changes {
            current.insert(key, value);
        }

        if let Err(reason) = validate(&current) {
            self.rollback_from_backup(&backup)?;
            return Err(Error::ValidationError(reason));
        }

        self.write_atomic(&current)?;
        Ok(backup)
    }

    /// `toggleChaos(on|off)` — convenience wrapper over [`Self::update_config`]
    /// using a dedicated reason tag.
    pub fn toggle_chaos(&self, enabled: bool) -> Result<BackupMetadata> {
        let mut changes = HashMap::new();
        changes.insert("CHAOS_ENABLED".to_string(), enabled.to_string());
        self.update_config(changes, "toggle_chaos", |_| Ok(()))
    }

    /// `rollbackConfig(backupId)` — copy a backup over the live file.
    /// Deliberately does not re-validate: rollback must always succeed
    /// even if the current schema has since tightened.
    pub fn rollback_config(&self, backup_id: &str) -> Result<()> {
        let _guard = self.lock("rollback_config")?;
        let metadata = self.read_backup_metadata(backup_id)?;
        self.rollback_from_backup(&metadata)
    }

    /// Verify a backup's env file still matches its recorded checksum.
    pub fn verify_backup(&self, backup_id: &str) -> Result<bool> {
        let metadata = self.read_backup_metadata(backup_id)?;
        let contents = fs::read(self.backup_env_path(backup_id))?;
        Ok(checksum(&contents) == metadata.checksum)
    }

    /// List backups, newest first.
    pub fn list_backups(&self) -> Result<Vec<BackupMetadata>> {
        let mut backups = Vec::new();
        for entry in fs::read_dir(&self.backups_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                let contents = fs::read_to_string(&path)?;
                if let Ok(meta) = serde_json::from_str::<BackupMetadata>(&contents) {
                    backups.push(meta);
                }
            }
        }
        backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(backups)
    }

    /// `cleanupBackups(keep)` — keep the most recent `keep` backups; delete
    /// the rest (env + metadata) atomically per-backup.
    pub fn cleanup_backups(&self, keep: usize) -> Result<usize> {
        let backups = self.list_backups()?;
        let stale = backups.into_iter().skip(keep);
        let mut removed = 0;
        for meta in stale {
            let _ = fs::remove_file(self.backup_env_path(&meta.id));
            let _ = fs::remove_file(self.backup_meta_path(&meta.id));
            removed += 1;
        }
        Ok(removed)
    }

    /// `cleanupStaleLocks()` — on start, remove any lock file whose owner
    /// PID is no longer running or whose timestamp exceeds the lock
    /// timeout.
    pub fn cleanup_stale_locks(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.locks_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("lock") {
                continue;
            }
            if let Ok(contents) = fs::read_to_string(&path) {
                if let Ok(lock) = serde_json::from_str::<LockFile>(&contents) {
                    if lock::is_stale(&lock, self.lock_timeout) {
                        let _ = fs::remove_file(&path);
                        removed += 1;
                    }
                }
            }
        }
        Ok(removed)
    }

    fn lock(&self, operation: &str) -> Result<LockGuard> {
        FileLock::new(&self.locks_dir, self.lock_timeout).acquire(operation)
    }

    fn create_backup_locked(&self, reason: &str) -> Result<BackupMetadata> {
        let id = uuid::Uuid::new_v4().to_string();
        let contents = fs::read(&self.env_path)?;
        let meta = BackupMetadata {
            id: id.clone(),
            timestamp: Utc::now(),
            reason: reason.to_string(),
            checksum: checksum(&contents),
            size: contents.len() as u64,
        };
        fs::write(self.backup_env_path(&id), &contents)?;
        fs::write(
            self.backup_meta_path(&id),
            serde_json::to_vec_pretty(&meta).map_err(|e| Error::ConfigManager(e.to_string()))?,
        )?;
        Ok(meta)
    }

    fn rollback_from_backup(&self, meta: &BackupMetadata) -> Result<()> {
        let contents = fs::read(self.backup_env_path(&meta.id))?;
        let tmp = self.env_path.with_extension("tmp");
        fs::write(&tmp, &contents)?;
        fs::rename(&tmp, &self.env_path)?;
        Ok(())
    }

    fn read_backup_metadata(&self, backup_id: &str) -> Result<BackupMetadata> {
        let contents = fs::read_to_string(self.backup_meta_path(backup_id))
            .map_err(|_| Error::NotFound(format!("backup {backup_id}")))?;
        serde_json::from_str(&contents).map_err(|e| Error::ConfigManager(e.to_string()))
    }

    fn write_atomic(&self, map: &ConfigMap) -> Result<()> {
        let serialized = format_env_file(map);
        let tmp = self.env_path.with_extension("tmp");
        fs::write(&tmp, serialized)?;
        fs::rename(&tmp, &self.env_path)?;
        Ok(())
    }

    fn backup_env_path(&self, id: &str) -> PathBuf {
        self.backups_dir.join(format!("{id}.env"))
    }

    fn backup_meta_path(&self, id: &str) -> PathBuf {
        self.backups_dir.join(format!("{id}.json"))
    }
}

/// Deterministic, non-cryptographic integrity hash (§4.10: "a fast integer
/// hash over the file bytes suffices; used only for corruption detection,
/// not security"). Blake3 is already a dependency for the audit chain and
/// credential sealing, so its output is truncated rather than pulling in a
/// second hash primitive.
pub fn checksum(bytes: &[u8]) -> u64 {
    let hash = blake3::hash(bytes);
    let b = hash.as_bytes();
    u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

/// Validates that `map` carries every key in [`REQUIRED_KEYS`] and that
/// `PORT` / `HTTP_TIMEOUT_MS` parse as integers. Used as the default
/// `validate` closure by callers that don't need stricter checks.
pub fn validate_required_keys(map: &ConfigMap) -> std::result::Result<(), String> {
    for key in REQUIRED_KEYS {
        if !map.contains_key(*key) {
            return Err(format!("missing required key: {key}"));
        }
    }
    if let Some(port) = map.get("PORT") {
        port.parse::<u16>()
            .map_err(|_| format!("PORT must be a valid u16, got '{port}'"))?;
    }
    if let Some(timeout) = map.get("HTTP_TIMEOUT_MS") {
        timeout
            .parse::<u64>()
            .map_err(|_| format!("HTTP_TIMEOUT_MS must be a valid u64, got '{timeout}'"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(dir: &tempfile::TempDir) -> ConfigManager {
        ConfigManager::open(dir.path().join("config/.env")).unwrap()
    }

    #[test]
    fn read_config_on_fresh_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);
        assert!(mgr.read_config().unwrap().is_empty());
    }

    #[test]
    fn update_config_persists_changes_and_backs_up() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);
        let mut changes = HashMap::new();
        changes.insert("PORT".to_string(), "3000".to_string());
        let backup = mgr.update_config(changes, "initial setup", |_| Ok(())).unwrap();

        let current = mgr.read_config().unwrap();
        assert_eq!(current.get("PORT"), Some(&"3000".to_string()));
        assert!(mgr.verify_backup(&backup.id).unwrap());
    }

    #[test]
    fn update_config_rolls_back_on_validation_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);

        let mut first = HashMap::new();
        first.insert("PORT".to_string(), "3000".to_string());
        mgr.update_config(first, "seed", |_| Ok(())).unwrap();

        let mut bad = HashMap::new();
        bad.insert("PORT".to_string(), "not-a-number".to_string());
        let err = mgr
            .update_config(bad, "bad change", |map| validate_required_keys(map))
            .unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));

        let current = mgr.read_config().unwrap();
        assert_eq!(current.get("PORT"), Some(&"3000".to_string()));
    }

    #[test]
    fn rollback_config_restores_a_prior_backup() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);

        let mut v1 = HashMap::new();
        v1.insert("PORT".to_string(), "3000".to_string());
        let backup_v1 = mgr.update_config(v1, "v1", |_| Ok(())).unwrap();

        let mut v2 = HashMap::new();
        v2.insert("PORT".to_string(), "4000".to_string());
        mgr.update_config(v2, "v2", |_| Ok(())).unwrap();

        mgr.rollback_config(&backup_v1.id).unwrap();
        let current = mgr.read_config().unwrap();
        assert_eq!(current.get("PORT"), Some(&"3000".to_string()));
    }

    #[test]
    fn cleanup_backups_keeps_only_the_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);
        for i in 0..5 {
            let mut changes = HashMap::new();
            changes.insert("PORT".to_string(), (3000 + i).to_string());
            mgr.update_config(changes, "iter", |_| Ok(())).unwrap();
        }
        let removed = mgr.cleanup_backups(2).unwrap();
        assert_eq!(removed, 3);
        assert_eq!(mgr.list_backups().unwrap().len(), 2);
    }

    #[test]
    fn checksum_is_deterministic() {
        let a = checksum(b"hello world");
        let b = checksum(b"hello world");
        assert_eq!(a, b);
        assert_ne!(a, checksum(b"hello worlD"));
    }
}
