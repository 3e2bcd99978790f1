use crate::env;
use crate::handler::{LockTable, SessionHandler, SessionLock};
use crate::session::config::SessionConfig;
use crate::session::types::{Result, SessionError, SessionId};
use async_trait::async_trait;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// One file per session record inside a save directory.
///
/// Records are written to a uniquely named partial file and renamed into
/// place, so a reader never observes a half-written record.
///
/// `open` takes an advisory lock on a hidden `.lock` file next to the record,
/// so cycles are exclusive across every process sharing the directory,
/// including the maintenance CLI.
pub struct FileHandler {
    save_path: PathBuf,
    file_prefix: String,
    compress: bool,
    locks: LockTable,
    lock_timeout: Duration,
}

impl FileHandler {
    /// Create a handler rooted at `save_path`, creating the directory if needed
    pub fn new(save_path: PathBuf, file_prefix: &str, compress: bool) -> Result<Self> {
        std::fs::create_dir_all(&save_path).map_err(|e| {
            SessionError::Unavailable(format!(
                "Failed to create session directory {}: {}",
                save_path.display(),
                e
            ))
        })?;

        debug!("File session handler rooted at {}", save_path.display());

        Ok(Self {
            save_path,
            file_prefix: file_prefix.to_string(),
            compress,
            locks: LockTable::new(),
            lock_timeout: Duration::from_secs(env::session::LOCK_WAIT_TIMEOUT_SECS),
        })
    }

    /// How long `open` waits for another process to release a record
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        let save_path = config
            .save_path
            .clone()
            .unwrap_or_else(env::default_save_path);
        Self::new(save_path, &config.cookie_name, config.compress)
    }

    pub fn save_path(&self) -> &Path {
        &self.save_path
    }

    fn record_path(&self, id: &SessionId) -> PathBuf {
        env::session_file_path(&self.save_path, &self.file_prefix, id.as_str())
    }

    fn lock_path(&self, id: &SessionId) -> PathBuf {
        env::session_lock_path(&self.save_path, &self.file_prefix, id.as_str())
    }

    fn partial_path(&self, id: &SessionId) -> PathBuf {
        self.save_path.join(format!(
            ".{}{}.{}.{}",
            self.file_prefix,
            id,
            uuid::Uuid::new_v4(),
            env::session::PARTIAL_FILE_EXTENSION
        ))
    }

    /// Identifier encoded in a record file name, if the name is one of ours
    fn id_from_file_name(&self, file_name: &str) -> Option<SessionId> {
        file_name
            .strip_prefix(&self.file_prefix)
            .and_then(SessionId::parse)
    }

    fn id_from_lock_file_name(&self, file_name: &str) -> Option<SessionId> {
        let suffix = format!(".{}", env::session::LOCK_FILE_EXTENSION);
        file_name
            .strip_prefix('.')?
            .strip_prefix(self.file_prefix.as_str())?
            .strip_suffix(suffix.as_str())
            .and_then(SessionId::parse)
    }

    /// Delete an expired record unless a cycle in any process holds it
    async fn purge_record(&self, id: &SessionId, path: &Path, cutoff: SystemTime) -> bool {
        if self.locks.is_locked(id.as_str()) || !is_older_than(path, cutoff).await {
            return false;
        }

        let held = match try_lock_file(&self.lock_path(id)) {
            Ok(Some(file)) => file,
            Ok(None) => {
                debug!("Skipping open session during gc: {}", id);
                return false;
            }
            Err(e) => {
                warn!("Could not lock session record {}: {}", id, e);
                return false;
            }
        };

        // Written by a cycle that finished between the check and the lock
        if !is_older_than(path, cutoff).await {
            return false;
        }

        let removed = match async_fs::remove_file(path).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                warn!("Failed to remove expired session {}: {}", id, e);
                false
            }
        };
        if removed {
            let _ = async_fs::remove_file(self.lock_path(id)).await;
        }

        drop(held);
        removed
    }

    /// Remove a stale lock file whose record no longer exists
    async fn purge_orphan_lock(&self, id: &SessionId, path: &Path, cutoff: SystemTime) {
        if self.locks.is_locked(id.as_str()) || !is_older_than(path, cutoff).await {
            return;
        }

        if let Ok(Some(held)) = try_lock_file(path) {
            if !async_fs::try_exists(self.record_path(id)).await.unwrap_or(true) {
                let _ = async_fs::remove_file(path).await;
            }
            drop(held);
        }
    }

    fn encode(&self, payload: &[u8]) -> Result<Vec<u8>> {
        if !self.compress {
            return Ok(payload.to_vec());
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload)?;
        Ok(encoder.finish()?)
    }

    /// Compressed records are recognised by their header, so toggling
    /// compression keeps older records readable.
    fn decode(&self, content: Vec<u8>) -> Result<Vec<u8>> {
        if !content.starts_with(&GZIP_MAGIC) {
            return Ok(content);
        }

        let mut decoded = Vec::new();
        GzDecoder::new(content.as_slice()).read_to_end(&mut decoded)?;
        Ok(decoded)
    }
}

#[async_trait]
impl SessionHandler for FileHandler {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn open(&self, id: &SessionId) -> Result<SessionLock> {
        let lock = self.locks.acquire(id).await;
        let path = self.lock_path(id);
        let started = Instant::now();

        loop {
            if let Some(file) = try_lock_file(&path)? {
                return Ok(lock.holding(file));
            }

            if started.elapsed() >= self.lock_timeout {
                return Err(SessionError::Unavailable(format!(
                    "timed out after {:?} waiting for the lock on session {}",
                    self.lock_timeout, id
                )));
            }

            tokio::time::sleep(Duration::from_millis(env::session::LOCK_POLL_INTERVAL_MS)).await;
        }
    }

    async fn read(&self, id: &SessionId) -> Result<Option<Vec<u8>>> {
        match async_fs::read(self.record_path(id)).await {
            Ok(content) => Ok(Some(self.decode(content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, id: &SessionId, payload: &[u8]) -> Result<()> {
        let encoded = self.encode(payload)?;
        let partial = self.partial_path(id);

        let written = async {
            let mut file = async_fs::File::create(&partial).await?;
            file.write_all(&encoded).await?;
            file.sync_all().await?;
            async_fs::rename(&partial, self.record_path(id)).await
        }
        .await;

        if let Err(e) = written {
            let _ = async_fs::remove_file(&partial).await;
            return Err(e.into());
        }

        debug!("Wrote session record {} ({} bytes)", id, encoded.len());
        Ok(())
    }

    async fn exists(&self, id: &SessionId) -> Result<bool> {
        Ok(async_fs::try_exists(self.record_path(id)).await?)
    }

    async fn destroy(&self, id: &SessionId) -> Result<()> {
        match async_fs::remove_file(self.record_path(id)).await {
            Ok(()) => {
                debug!("Destroyed session record {}", id);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn gc(&self, max_lifetime: Duration) -> Result<usize> {
        let cutoff = SystemTime::now()
            .checked_sub(max_lifetime)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut entries = async_fs::read_dir(&self.save_path).await?;
        let mut purged = 0;

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };

            if let Some(id) = self.id_from_file_name(name) {
                if self.purge_record(&id, &entry.path(), cutoff).await {
                    purged += 1;
                }
            } else if let Some(id) = self.id_from_lock_file_name(name) {
                self.purge_orphan_lock(&id, &entry.path(), cutoff).await;
            }
        }

        if purged > 0 {
            info!("Garbage collected {} expired session records", purged);
        }

        Ok(purged)
    }

    async fn ids(&self) -> Result<Vec<SessionId>> {
        let mut entries = async_fs::read_dir(&self.save_path).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| self.id_from_file_name(name))
            {
                ids.push(id);
            }
        }

        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }
}

/// Take the advisory lock on `path` without waiting.
///
/// `None` when another holder has it, or when gc unlinked the file after it
/// was opened here; the caller retries with a fresh open either way.
fn try_lock_file(path: &Path) -> io::Result<Option<File>> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;

    match file.try_lock_exclusive() {
        Ok(()) if is_same_file(&file, path)? => Ok(Some(file)),
        Ok(()) => Ok(None),
        Err(e) if is_contended(&e) => Ok(None),
        Err(e) => Err(e),
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(unix)]
fn is_same_file(file: &File, path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match std::fs::metadata(path) {
        Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

// Open files cannot be unlinked on Windows
#[cfg(not(unix))]
fn is_same_file(_file: &File, _path: &Path) -> io::Result<bool> {
    Ok(true)
}

async fn is_older_than(path: &Path, cutoff: SystemTime) -> bool {
    match async_fs::metadata(path).await.and_then(|meta| meta.modified()) {
        Ok(modified) => modified < cutoff,
        Err(e) => {
            if e.kind() != ErrorKind::NotFound {
                warn!("Could not stat {}: {}", path.display(), e);
            }
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn handler(dir: &TempDir, compress: bool) -> FileHandler {
        FileHandler::new(dir.path().to_path_buf(), "ci_session", compress).unwrap()
    }

    #[tokio::test]
    async fn test_write_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir, false);
        let id = SessionId::generate();

        assert_eq!(handler.read(&id).await.unwrap(), None);
        assert!(!handler.exists(&id).await.unwrap());

        handler.write(&id, b"{\"data\":{}}").await.unwrap();

        assert_eq!(handler.read(&id).await.unwrap().unwrap(), b"{\"data\":{}}");
        assert!(handler.exists(&id).await.unwrap());
        assert!(dir.path().join(format!("ci_session{}", id)).exists());
    }

    #[tokio::test]
    async fn test_write_replaces_record() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir, false);
        let id = SessionId::generate();

        handler.write(&id, b"first record").await.unwrap();
        handler.write(&id, b"second").await.unwrap();

        assert_eq!(handler.read(&id).await.unwrap().unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_compressed_records_are_readable_after_toggle() {
        let dir = TempDir::new().unwrap();
        let id = SessionId::generate();
        let payload = br#"{"data":{"greeting":"hello hello hello hello"}}"#;

        handler(&dir, true).write(&id, payload).await.unwrap();
        let raw = std::fs::read(dir.path().join(format!("ci_session{}", id))).unwrap();
        assert!(raw.starts_with(&GZIP_MAGIC));

        let plain = handler(&dir, false);
        assert_eq!(plain.read(&id).await.unwrap().unwrap(), payload.to_vec());
    }

    #[tokio::test]
    async fn test_destroy_missing_record_is_ok() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir, false);
        let id = SessionId::generate();

        handler.destroy(&id).await.unwrap();

        handler.write(&id, b"x").await.unwrap();
        handler.destroy(&id).await.unwrap();
        assert_eq!(handler.read(&id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ids_ignore_foreign_files() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir, false);
        let id = SessionId::generate();

        handler.write(&id, b"x").await.unwrap();
        std::fs::write(dir.path().join("README"), b"not a session").unwrap();
        std::fs::write(dir.path().join("ci_sessionNOT-AN-ID"), b"bad").unwrap();

        assert_eq!(handler.ids().await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_gc_purges_stale_records_but_not_open_ones() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir, false);
        let stale = SessionId::generate();
        let open = SessionId::generate();

        handler.write(&stale, b"stale").await.unwrap();
        handler.write(&open, b"open").await.unwrap();
        let _lock = handler.open(&open).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(handler.gc(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(handler.gc(Duration::ZERO).await.unwrap(), 1);

        assert!(!handler.exists(&stale).await.unwrap());
        assert!(handler.exists(&open).await.unwrap());
    }

    #[tokio::test]
    async fn test_gc_from_another_handler_skips_open_record() {
        let dir = TempDir::new().unwrap();
        let server = handler(&dir, false);
        let maintenance = handler(&dir, false);
        let id = SessionId::generate();

        server.write(&id, b"in use").await.unwrap();
        let lock = server.open(&id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(maintenance.gc(Duration::ZERO).await.unwrap(), 0);
        assert!(maintenance.exists(&id).await.unwrap());

        server.close(lock).await.unwrap();

        assert_eq!(maintenance.gc(Duration::ZERO).await.unwrap(), 1);
        assert!(!server.exists(&id).await.unwrap());
        assert!(!dir.path().join(format!(".ci_session{}.lock", id)).exists());
    }

    #[tokio::test]
    async fn test_open_excludes_other_handlers_on_same_directory() {
        let dir = TempDir::new().unwrap();
        let first = handler(&dir, false);
        let second = Arc::new(handler(&dir, false).with_lock_timeout(Duration::from_secs(5)));
        let id = SessionId::generate();

        let held = first.open(&id).await.unwrap();

        let impatient = handler(&dir, false).with_lock_timeout(Duration::from_millis(50));
        assert!(matches!(
            impatient.open(&id).await,
            Err(SessionError::Unavailable(_))
        ));

        let waiter = {
            let second = second.clone();
            let id = id.clone();
            tokio::spawn(async move { second.open(&id).await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        drop(held);
        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("second handler should acquire after release")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_gc_removes_orphaned_lock_files() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir, false);
        let id = SessionId::generate();

        let lock = handler.open(&id).await.unwrap();
        drop(lock);
        let lock_file = dir.path().join(format!(".ci_session{}.lock", id));
        assert!(lock_file.exists());
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(handler.gc(Duration::ZERO).await.unwrap(), 0);
        assert!(!lock_file.exists());
        assert!(handler.ids().await.unwrap().is_empty());
    }
}
