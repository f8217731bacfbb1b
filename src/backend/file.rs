//! File backend (one file per entry, optional hashed sub-directories).
//!
//! Entries are `rkyv`-encoded [`StoredRecord`]s written through a temp file and
//! renamed into place. Sets are newline-separated files opened in append mode,
//! so concurrent adds from several processes interleave instead of overwriting
//! each other. Appends hold a shared lock on the set file and a take holds an
//! exclusive one while it reads and truncates. Tags live inside the record, which makes the tag clean modes
//! native (a directory scan) rather than emulated.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::error::{BackendError, BackendResult};
use super::record::{StoredRecord, now_millis};
use super::{CacheBackend, Capabilities, CleanMode};

const ENTRY_PREFIX: &str = "e-";
const SET_PREFIX: &str = "s-";
const TEMP_MARKER: &str = ".tmp-";
const MAX_PLAIN_STEM_LEN: usize = 64;

/// Path layout and blocking I/O of the file backend.
#[derive(Debug)]
struct FileLayout {
    root: PathBuf,
    directory_level: u8,
}

impl FileLayout {
    fn stem(key: &str) -> String {
        let plain = !key.is_empty()
            && key.len() <= MAX_PLAIN_STEM_LEN
            && key
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if plain {
            key.to_string()
        } else {
            blake3::hash(key.as_bytes()).to_hex().to_string()
        }
    }

    fn dir_for(&self, key: &str) -> PathBuf {
        let mut dir = self.root.clone();
        if self.directory_level > 0 {
            let hex = blake3::hash(key.as_bytes()).to_hex();
            for level in 1..=self.directory_level as usize {
                dir.push(&hex[..level]);
            }
        }
        dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir_for(key)
            .join(format!("{ENTRY_PREFIX}{}", Self::stem(key)))
    }

    fn set_path(&self, key: &str) -> PathBuf {
        self.dir_for(key)
            .join(format!("{SET_PREFIX}{}", Self::stem(key)))
    }

    fn write_entry(&self, key: &str, record: &StoredRecord) -> BackendResult<()> {
        let final_path = self.entry_path(key);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let bytes = record.to_bytes()?;
        let temp_path = final_path.with_file_name(format!(
            "{ENTRY_PREFIX}{}{TEMP_MARKER}{:016x}",
            Self::stem(key),
            rand::random::<u64>()
        ));

        {
            let mut file = File::create(&temp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }

        if let Err(e) = fs::rename(&temp_path, &final_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        Ok(())
    }

    fn read_entry(&self, key: &str, now_ms: i64) -> BackendResult<Option<Vec<u8>>> {
        let path = self.entry_path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record = match StoredRecord::from_bytes(&bytes) {
            Ok(record) if record.is_intact() => record,
            Ok(_) | Err(_) => {
                warn!(path = %path.display(), "Discarding corrupt cache file");
                remove_if_exists(&path)?;
                return Ok(None);
            }
        };

        if record.is_expired(now_ms) {
            remove_if_exists(&path)?;
            return Ok(None);
        }

        Ok(Some(record.payload))
    }

    fn remove(&self, key: &str) -> BackendResult<bool> {
        let entry = remove_if_exists(&self.entry_path(key))?;
        let set = remove_if_exists(&self.set_path(key))?;
        Ok(entry || set)
    }

    fn append_set(&self, key: &str, members: &[String]) -> BackendResult<()> {
        let mut buf = String::new();
        for member in members.iter().filter(|m| !m.is_empty() && !m.contains('\n')) {
            buf.push_str(member);
            buf.push('\n');
        }
        if buf.is_empty() {
            return Ok(());
        }

        let path = self.set_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // One write per call keeps appends from different writers whole.
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.lock_shared()?;
        file.write_all(buf.as_bytes())?;
        Ok(())
    }

    fn read_set(&self, key: &str) -> BackendResult<Vec<String>> {
        match fs::read_to_string(self.set_path(key)) {
            Ok(content) => Ok(parse_members(&content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn take_set(&self, key: &str) -> BackendResult<Vec<String>> {
        let mut file = match OpenOptions::new()
            .read(true)
            .write(true)
            .open(self.set_path(key))
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        file.lock()?;
        let mut content = String::new();
        file.read_to_string(&mut content)?;
        file.set_len(0)?;
        Ok(parse_members(&content))
    }

    fn clean(&self, mode: &CleanMode, now_ms: i64) -> BackendResult<usize> {
        let mut removed = 0usize;
        for path in self.walk()? {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let is_entry = name.starts_with(ENTRY_PREFIX);
            let is_set = name.starts_with(SET_PREFIX);

            let doomed = match mode {
                CleanMode::All => is_entry || is_set,
                _ if !is_entry || name.contains(TEMP_MARKER) => false,
                CleanMode::Old => match read_record(&path)? {
                    Some(record) => !record.is_intact() || record.is_expired(now_ms),
                    None => true,
                },
                CleanMode::MatchingTag(tags) => {
                    read_record(&path)?.is_some_and(|r| r.has_any_tag(tags))
                }
                CleanMode::NotMatchingTag(tags) => {
                    read_record(&path)?.is_some_and(|r| !r.has_any_tag(tags))
                }
            };

            if doomed && remove_if_exists(&path)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn walk(&self) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            for entry in entries {
                let entry = entry?;
                let file_type = entry.file_type()?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if file_type.is_file() {
                    files.push(entry.path());
                }
            }
        }
        Ok(files)
    }
}

/// Splits a set file into its distinct members, first occurrence first.
fn parse_members(content: &str) -> Vec<String> {
    let mut members: Vec<String> = Vec::new();
    for line in content.lines().filter(|l| !l.is_empty()) {
        if !members.iter().any(|m| m == line) {
            members.push(line.to_string());
        }
    }
    members
}

/// Reads a record for scanning; a file that vanished or cannot be decoded yields `None`.
fn read_record(path: &Path) -> BackendResult<Option<StoredRecord>> {
    match fs::read(path) {
        Ok(bytes) => Ok(StoredRecord::from_bytes(&bytes).ok()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone)]
/// Stores cache entries as files under a root directory.
pub struct FileBackend {
    layout: Arc<FileLayout>,
}

impl FileBackend {
    /// Creates a backend rooted at `root` with `directory_level` hashed sub-directories.
    pub fn new(root: impl Into<PathBuf>, directory_level: u8) -> Self {
        Self {
            layout: Arc::new(FileLayout {
                root: root.into(),
                directory_level,
            }),
        }
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.layout.root
    }

    async fn blocking<T, F>(&self, f: F) -> BackendResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&FileLayout) -> BackendResult<T> + Send + 'static,
    {
        let layout = Arc::clone(&self.layout);
        tokio::task::spawn_blocking(move || f(&layout)).await?
    }
}

#[async_trait]
impl CacheBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            native_tags: true,
            multi_load: false,
        }
    }

    async fn ping(&self) -> BackendResult<()> {
        self.blocking(|layout| {
            fs::create_dir_all(&layout.root)?;
            if !fs::metadata(&layout.root)?.is_dir() {
                return Err(BackendError::Io(io::Error::new(
                    ErrorKind::NotADirectory,
                    format!("{} is not a directory", layout.root.display()),
                )));
            }
            Ok(())
        })
        .await
    }

    async fn load(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        let key = key.to_string();
        self.blocking(move |layout| layout.read_entry(&key, now_millis()))
            .await
    }

    async fn save(
        &self,
        payload: &[u8],
        key: &str,
        tags: &[String],
        ttl: Option<Duration>,
    ) -> BackendResult<bool> {
        let record = StoredRecord::new(payload, tags, ttl, now_millis());
        let key = key.to_string();
        self.blocking(move |layout| layout.write_entry(&key, &record))
            .await?;
        Ok(true)
    }

    async fn remove(&self, key: &str) -> BackendResult<bool> {
        let key = key.to_string();
        self.blocking(move |layout| layout.remove(&key)).await
    }

    async fn clean(&self, mode: &CleanMode) -> BackendResult<bool> {
        let owned = mode.clone();
        let removed = self
            .blocking(move |layout| layout.clean(&owned, now_millis()))
            .await?;
        debug!(mode = mode.as_str(), removed, "File cache cleaned");
        Ok(true)
    }

    async fn add_to_set(&self, key: &str, members: &[String]) -> BackendResult<bool> {
        let key = key.to_string();
        let members = members.to_vec();
        self.blocking(move |layout| layout.append_set(&key, &members))
            .await?;
        Ok(true)
    }

    async fn load_set(&self, key: &str) -> BackendResult<Vec<String>> {
        let key = key.to_string();
        self.blocking(move |layout| layout.read_set(&key)).await
    }

    async fn take_set(&self, key: &str) -> BackendResult<Vec<String>> {
        let key = key.to_string();
        self.blocking(move |layout| layout.take_set(&key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn backend(level: u8) -> (TempDir, FileBackend) {
        let dir = TempDir::new().expect("temp dir");
        let backend = FileBackend::new(dir.path(), level);
        (dir, backend)
    }

    #[test]
    fn test_stem_keeps_plain_keys_and_hashes_others() {
        assert_eq!(FileLayout::stem("0123abcd"), "0123abcd");
        let hashed = FileLayout::stem("tag::topic update/../x");
        assert_eq!(hashed.len(), 64);
        assert!(!hashed.contains('/'));
        assert_eq!(FileLayout::stem(""), FileLayout::stem(""));
        assert_eq!(FileLayout::stem("").len(), 64);
    }

    #[test]
    fn test_directory_levels_nest_under_root() {
        let layout = FileLayout {
            root: PathBuf::from("/cache"),
            directory_level: 2,
        };
        let path = layout.entry_path("abc");
        let hex = blake3::hash(b"abc").to_hex();
        let expected = PathBuf::from("/cache")
            .join(&hex[..1])
            .join(&hex[..2])
            .join("e-abc");
        assert_eq!(path, expected);
    }

    #[tokio::test]
    async fn test_save_load_remove() {
        let (_dir, backend) = backend(0);

        assert!(backend.save(b"hello", "k1", &[], None).await.unwrap());
        assert_eq!(backend.load("k1").await.unwrap(), Some(b"hello".to_vec()));

        assert!(backend.remove("k1").await.unwrap());
        assert_eq!(backend.load("k1").await.unwrap(), None);
        assert!(!backend.remove("k1").await.unwrap());
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let (_dir, backend) = backend(1);

        backend.save(b"first", "k", &[], None).await.unwrap();
        backend.save(b"second", "k", &[], None).await.unwrap();
        assert_eq!(backend.load("k").await.unwrap(), Some(b"second".to_vec()));
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent_and_purged() {
        let (_dir, backend) = backend(0);

        backend
            .save(b"v", "short", &[], Some(Duration::from_millis(30)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(backend.load("short").await.unwrap(), None);
        assert!(!backend.layout.entry_path("short").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_a_miss() {
        let (_dir, backend) = backend(0);

        backend.save(b"v", "k", &[], None).await.unwrap();
        let path = backend.layout.entry_path("k");
        std::fs::write(&path, b"not an rkyv record").unwrap();

        assert_eq!(backend.load("k").await.unwrap(), None);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_clean_old_keeps_live_entries() {
        let (_dir, backend) = backend(2);

        backend
            .save(b"old", "old", &[], Some(Duration::from_millis(10)))
            .await
            .unwrap();
        backend.save(b"live", "live", &[], None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(backend.clean(&CleanMode::Old).await.unwrap());
        assert!(!backend.layout.entry_path("old").exists());
        assert_eq!(backend.load("live").await.unwrap(), Some(b"live".to_vec()));
    }

    #[tokio::test]
    async fn test_clean_matching_tag_is_native() {
        let (_dir, backend) = backend(1);

        backend
            .save(b"a", "a", &tags(&["topic_update"]), None)
            .await
            .unwrap();
        backend
            .save(b"b", "b", &tags(&["blog_1", "topic_update"]), None)
            .await
            .unwrap();
        backend.save(b"c", "c", &tags(&["blog_1"]), None).await.unwrap();
        backend.save(b"d", "d", &[], None).await.unwrap();

        backend
            .clean(&CleanMode::matching(&["topic_update"]))
            .await
            .unwrap();

        assert_eq!(backend.load("a").await.unwrap(), None);
        assert_eq!(backend.load("b").await.unwrap(), None);
        assert_eq!(backend.load("c").await.unwrap(), Some(b"c".to_vec()));
        assert_eq!(backend.load("d").await.unwrap(), Some(b"d".to_vec()));
    }

    #[tokio::test]
    async fn test_clean_not_matching_tag() {
        let (_dir, backend) = backend(0);

        backend.save(b"a", "a", &tags(&["keep"]), None).await.unwrap();
        backend.save(b"b", "b", &tags(&["other"]), None).await.unwrap();
        backend.save(b"c", "c", &[], None).await.unwrap();

        backend
            .clean(&CleanMode::not_matching(&["keep"]))
            .await
            .unwrap();

        assert!(backend.load("a").await.unwrap().is_some());
        assert!(backend.load("b").await.unwrap().is_none());
        assert!(backend.load("c").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clean_all_removes_entries_and_sets() {
        let (_dir, backend) = backend(1);

        backend.save(b"a", "a", &[], None).await.unwrap();
        backend
            .add_to_set("tag::x", &tags(&["a"]))
            .await
            .unwrap();

        backend.clean(&CleanMode::All).await.unwrap();

        assert!(backend.load("a").await.unwrap().is_none());
        assert!(backend.load_set("tag::x").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sets_append_and_dedupe() {
        let (_dir, backend) = backend(0);

        backend
            .add_to_set("tag::t", &tags(&["k1", "k2"]))
            .await
            .unwrap();
        backend
            .add_to_set("tag::t", &tags(&["k2", "k3", "bad\nmember"]))
            .await
            .unwrap();

        assert_eq!(
            backend.load_set("tag::t").await.unwrap(),
            tags(&["k1", "k2", "k3"])
        );
        assert!(backend.remove("tag::t").await.unwrap());
        assert!(backend.load_set("tag::t").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_set_adds_are_not_lost() {
        let (_dir, backend) = backend(0);

        let mut handles = Vec::new();
        for i in 0..16 {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move {
                backend
                    .add_to_set("tag::race", &[format!("key{i}")])
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(backend.load_set("tag::race").await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_take_set_returns_and_clears() {
        let (_dir, backend) = backend(1);
        assert!(backend.take_set("tag::t").await.unwrap().is_empty());

        backend.add_to_set("tag::t", &tags(&["k1", "k2"])).await.unwrap();
        assert_eq!(backend.take_set("tag::t").await.unwrap(), tags(&["k1", "k2"]));
        assert!(backend.load_set("tag::t").await.unwrap().is_empty());

        backend.add_to_set("tag::t", &tags(&["k3"])).await.unwrap();
        assert_eq!(backend.load_set("tag::t").await.unwrap(), tags(&["k3"]));
    }

    #[tokio::test]
    async fn test_adds_racing_takes_are_not_lost() {
        let (_dir, backend) = backend(0);

        let mut adders = Vec::new();
        for i in 0..32 {
            let backend = backend.clone();
            adders.push(tokio::spawn(async move {
                backend
                    .add_to_set("tag::race", &[format!("key{i}")])
                    .await
                    .unwrap();
            }));
        }
        let mut taken = Vec::new();
        for _ in 0..8 {
            taken.extend(backend.take_set("tag::race").await.unwrap());
        }
        for adder in adders {
            adder.await.unwrap();
        }
        taken.extend(backend.take_set("tag::race").await.unwrap());

        taken.sort();
        taken.dedup();
        assert_eq!(taken.len(), 32);
    }

    #[tokio::test]
    async fn test_ping_creates_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("nested").join("cache");
        let backend = FileBackend::new(&root, 0);

        backend.ping().await.expect("ping should create the directory");
        assert!(root.is_dir());
    }

    #[tokio::test]
    async fn test_ping_fails_when_root_is_a_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let backend = FileBackend::new(file.path(), 0);

        assert!(backend.ping().await.is_err());
    }
}
