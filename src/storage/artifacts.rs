//! File-backed artifact store rooted at a session directory.
//!
//! Keys are relative, `/`-separated paths. Fetched documents are keyed by a
//! content address derived from their source URL; structured stage outputs
//! use fixed stage-named keys (see [`super::keys`]). Every write goes to a
//! uniquely named temp file in the destination directory and is renamed into
//! place, so a reader never observes a half-written artifact and concurrent
//! workers writing distinct keys never contend.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::StoreError;

/// Suffix used for in-flight writes; never returned by [`ArtifactStore::list`].
const TEMP_SUFFIX: &str = ".partial";

/// Computes the stable content address for a source identifier (e.g. a URL).
pub fn content_address(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    hex::encode(&digest[..16])
}

/// Durable, file-addressable storage for one session's artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Opens (creating if needed) the store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the directory cannot be created or is not
    /// writable.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::io(&root, e))?;

        // Probe writability up front so a bad session directory fails at startup.
        let probe = root.join(format!(".write-probe-{}", Uuid::new_v4()));
        fs::write(&probe, b"")
            .await
            .map_err(|e| StoreError::io(&probe, e))?;
        fs::remove_file(&probe)
            .await
            .map_err(|e| StoreError::io(&probe, e))?;

        Ok(Self { root })
    }

    /// Returns the root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the filesystem path for a key after validating it.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    /// Reads an artifact, returning `None` if it does not exist.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Returns true if an artifact exists under `key`.
    pub async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        fs::try_exists(&path)
            .await
            .map_err(|e| StoreError::io(path, e))
    }

    /// Creates or overwrites an artifact atomically.
    pub async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = path.with_file_name(format!(
            ".{}.{}{}",
            file_name,
            Uuid::new_v4().simple(),
            TEMP_SUFFIX
        ));

        let write = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, &path).await
        };

        if let Err(e) = write.await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::io(&path, e));
        }

        Ok(())
    }

    /// Deletes an artifact. Deleting a missing key is not an error.
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Lists keys under `prefix` (a directory key such as `"raw"`), sorted.
    ///
    /// In-flight temp files and hidden files are excluded. A missing prefix
    /// directory yields an empty list.
    pub fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let dir = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.path_for(prefix)?
        };
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1) {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.clone());
                StoreError::io(path, std::io::Error::other(e.to_string()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name.starts_with('.') || name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&self.root) {
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Reads and deserializes a JSON artifact.
    ///
    /// An artifact that exists but does not parse is reported as
    /// `StoreError::Corrupt`; it is never silently discarded.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Serializes `value` as pretty JSON and writes it atomically.
    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Serialize {
            key: key.to_string(),
            source: e,
        })?;
        self.put(key, &bytes).await
    }

    /// Reads a JSON Lines artifact, one record per non-empty line.
    pub async fn get_jsonl<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<Vec<T>>, StoreError> {
        let Some(bytes) = self.get(key).await? else {
            return Ok(None);
        };
        let text = String::from_utf8(bytes).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        let mut records = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(line).map_err(|e| StoreError::Corrupt {
                key: key.to_string(),
                reason: format!("line {}: {}", line_no + 1, e),
            })?;
            records.push(record);
        }
        Ok(Some(records))
    }

    /// Writes `records` as JSON Lines atomically.
    pub async fn put_jsonl<T: Serialize>(&self, key: &str, records: &[T]) -> Result<(), StoreError> {
        let mut out = Vec::new();
        for record in records {
            serde_json::to_writer(&mut out, record).map_err(|e| StoreError::Serialize {
                key: key.to_string(),
                source: e,
            })?;
            out.push(b'\n');
        }
        self.put(key, &out).await
    }
}

/// Rejects absolute keys, traversal, and characters outside a safe set.
fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() || key.starts_with('/') || key.ends_with('/') {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        value: u32,
    }

    #[test]
    fn test_content_address_is_stable() {
        let a = content_address("https://example.com/a");
        assert_eq!(a, content_address("https://example.com/a"));
        assert_ne!(a, content_address("https://example.com/b"));
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("research_plan.json").is_ok());
        assert!(validate_key("raw/abc123.json").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("raw/../checkpoint.json").is_err());
        assert!(validate_key("raw//a.json").is_err());
        assert!(validate_key("raw/a b.json").is_err());
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let dir = TempDir::new().expect("temp dir");
        let store = ArtifactStore::open(dir.path()).await.expect("open");
        assert!(store.get("missing.json").await.expect("get").is_none());
        assert!(!store.contains("missing.json").await.expect("contains"));
    }

    #[tokio::test]
    async fn test_put_get_and_overwrite() {
        let dir = TempDir::new().expect("temp dir");
        let store = ArtifactStore::open(dir.path()).await.expect("open");

        store.put("raw/doc.json", b"first").await.expect("put");
        store.put("raw/doc.json", b"second").await.expect("overwrite");

        let bytes = store.get("raw/doc.json").await.expect("get");
        assert_eq!(bytes.as_deref(), Some(&b"second"[..]));
    }

    #[tokio::test]
    async fn test_list_skips_temp_and_hidden_files() {
        let dir = TempDir::new().expect("temp dir");
        let store = ArtifactStore::open(dir.path()).await.expect("open");

        store.put("raw/b.json", b"{}").await.expect("put");
        store.put("raw/a.json", b"{}").await.expect("put");
        std::fs::write(dir.path().join("raw/.a.json.123.partial"), b"half").expect("write temp");

        let keys = store.list("raw").expect("list");
        assert_eq!(keys, vec!["raw/a.json".to_string(), "raw/b.json".to_string()]);
        assert!(store.list("curated").expect("list").is_empty());
    }

    #[tokio::test]
    async fn test_json_round_trip_and_corruption() {
        let dir = TempDir::new().expect("temp dir");
        let store = ArtifactStore::open(dir.path()).await.expect("open");

        let record = Record {
            name: "plan".into(),
            value: 7,
        };
        store.put_json("record.json", &record).await.expect("put_json");
        let loaded: Option<Record> = store.get_json("record.json").await.expect("get_json");
        assert_eq!(loaded, Some(record));

        store.put("broken.json", b"{not json").await.expect("put");
        let result: Result<Option<Record>, _> = store.get_json("broken.json").await;
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_jsonl_reports_bad_line() {
        let dir = TempDir::new().expect("temp dir");
        let store = ArtifactStore::open(dir.path()).await.expect("open");

        let records = vec![
            Record {
                name: "a".into(),
                value: 1,
            },
            Record {
                name: "b".into(),
                value: 2,
            },
        ];
        store.put_jsonl("items.jsonl", &records).await.expect("put_jsonl");
        let loaded: Vec<Record> = store
            .get_jsonl("items.jsonl")
            .await
            .expect("get_jsonl")
            .expect("present");
        assert_eq!(loaded, records);

        store.put("bad.jsonl", b"{\"name\":\"a\",\"value\":1}\nnope\n").await.expect("put");
        let err = store.get_jsonl::<Record>("bad.jsonl").await.unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
