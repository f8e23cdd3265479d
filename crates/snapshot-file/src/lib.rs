//! Filesystem-based checkpoint storage implementation
//!
//! Layout: `<base>/<owner>/<generation>-<checkpoint id>.data` plus
//! `<generation>.meta.json`. Every save writes a data file of its own, then
//! renames the metadata into place; that rename is what makes the save
//! visible. Data without metadata pointing at it is left over from an
//! interrupted save and is ignored, then swept by cleanup.

use proven_snapshot::{CheckpointError, CheckpointMetadata, CheckpointStore, Result};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const DATA_EXT: &str = "data";
const META_SUFFIX: &str = ".meta.json";

/// Filesystem-based checkpoint store
pub struct FileCheckpointStore {
    /// Base directory for storing checkpoints
    base_path: PathBuf,
}

impl FileCheckpointStore {
    /// Create a new file-based checkpoint store
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    /// Directory holding an owner's checkpoints
    fn owner_dir(&self, owner: &str) -> PathBuf {
        let safe: String = owner
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.base_path.join(safe)
    }

    fn data_file(dir: &Path, meta: &CheckpointMetadata) -> PathBuf {
        dir.join(format!(
            "{:020}-{}.{}",
            meta.generation, meta.checkpoint_id, DATA_EXT
        ))
    }

    fn meta_file(dir: &Path, generation: u64) -> PathBuf {
        dir.join(format!("{:020}{}", generation, META_SUFFIX))
    }

    /// Write `bytes` to `path` via a temporary file and rename
    fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load every complete checkpoint's metadata, newest first
    fn load_metadata(&self, owner: &str) -> Result<Vec<CheckpointMetadata>> {
        let dir = self.owner_dir(owner);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut metas = Vec::new();
        for entry in entries.filter_map(std::result::Result::ok) {
            let path = entry.path();
            let is_meta = path
                .file_name()
                .and_then(|s| s.to_str())
                .is_some_and(|name| name.ends_with(META_SUFFIX));
            if !is_meta {
                continue;
            }

            let contents = fs::read(&path)?;
            let meta: CheckpointMetadata = serde_json::from_slice(&contents)
                .map_err(|e| CheckpointError::Corrupt(format!("{}: {}", path.display(), e)))?;
            metas.push(meta);
        }

        metas.sort_by(|a, b| b.generation.cmp(&a.generation));
        Ok(metas)
    }

    /// Delete every data file in `dir` that none of `live` points at
    fn remove_unreferenced_data(dir: &Path, live: &[CheckpointMetadata]) -> Result<()> {
        let referenced: HashSet<PathBuf> =
            live.iter().map(|meta| Self::data_file(dir, meta)).collect();

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries.filter_map(std::result::Result::ok) {
            let path = entry.path();
            let is_data = path.extension().and_then(|ext| ext.to_str()) == Some(DATA_EXT);
            if is_data && !referenced.contains(&path) {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save_checkpoint(
        &self,
        owner: &str,
        generation: u64,
        data: Vec<u8>,
    ) -> Result<CheckpointMetadata> {
        let dir = self.owner_dir(owner);
        fs::create_dir_all(&dir)?;

        let meta = CheckpointMetadata::describe(owner, generation, &data);
        let meta_bytes =
            serde_json::to_vec_pretty(&meta).map_err(|e| CheckpointError::Corrupt(e.to_string()))?;

        // Data first: the metadata rename switches readers over
        Self::write_atomically(&Self::data_file(&dir, &meta), &data)?;
        Self::write_atomically(&Self::meta_file(&dir, generation), &meta_bytes)?;

        // Data of the checkpoint this one replaced
        let swept = self
            .load_metadata(owner)
            .and_then(|metas| Self::remove_unreferenced_data(&dir, &metas));
        if let Err(e) = swept {
            tracing::warn!("Failed to remove replaced checkpoint data of {}: {}", owner, e);
        }

        Ok(meta)
    }

    fn latest_checkpoint(&self, owner: &str) -> Result<Option<(CheckpointMetadata, Vec<u8>)>> {
        let Some(meta) = self.load_metadata(owner)?.into_iter().next() else {
            return Ok(None);
        };

        let data = fs::read(Self::data_file(&self.owner_dir(owner), &meta))?;
        meta.verify(&data)?;
        Ok(Some((meta, data)))
    }

    fn list_checkpoints(&self, owner: &str) -> Result<Vec<CheckpointMetadata>> {
        self.load_metadata(owner)
    }

    fn cleanup_old_checkpoints(&self, owner: &str, keep_count: usize) -> Result<()> {
        let dir = self.owner_dir(owner);
        let metas = self.load_metadata(owner)?;
        let keep = keep_count.min(metas.len());

        // Metadata first so a half-deleted checkpoint reads as incomplete
        for meta in &metas[keep..] {
            fs::remove_file(Self::meta_file(&dir, meta.generation))?;
        }
        Self::remove_unreferenced_data(&dir, &metas[..keep])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_checkpoint_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(temp_dir.path()).unwrap();

        let owner = "batcher-main";

        // Initially nothing
        assert!(store.latest_checkpoint(owner).unwrap().is_none());

        store.save_checkpoint(owner, 1, b"first".to_vec()).unwrap();
        store.save_checkpoint(owner, 2, b"second".to_vec()).unwrap();

        let (meta, data) = store.latest_checkpoint(owner).unwrap().unwrap();
        assert_eq!(meta.generation, 2);
        assert_eq!(data, b"second");

        // Verify persistence - create a new store instance
        let store2 = FileCheckpointStore::new(temp_dir.path()).unwrap();
        let (meta2, data2) = store2.latest_checkpoint(owner).unwrap().unwrap();
        assert_eq!(meta2, meta);
        assert_eq!(data2, b"second");
    }

    #[test]
    fn test_incomplete_checkpoint_is_ignored() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(temp_dir.path()).unwrap();

        store.save_checkpoint("batcher-main", 1, b"good".to_vec()).unwrap();

        // Simulate a crash after the data file but before its metadata
        let dir = store.owner_dir("batcher-main");
        let unfinished = CheckpointMetadata::describe("batcher-main", 2, b"partial");
        fs::write(FileCheckpointStore::data_file(&dir, &unfinished), b"partial").unwrap();

        let (meta, data) = store.latest_checkpoint("batcher-main").unwrap().unwrap();
        assert_eq!(meta.generation, 1);
        assert_eq!(data, b"good");
    }

    #[test]
    fn test_tampered_data_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(temp_dir.path()).unwrap();

        let meta = store.save_checkpoint("batcher-main", 1, b"good".to_vec()).unwrap();
        let dir = store.owner_dir("batcher-main");
        fs::write(FileCheckpointStore::data_file(&dir, &meta), b"evil").unwrap();

        assert!(matches!(
            store.latest_checkpoint("batcher-main"),
            Err(CheckpointError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_cleanup_removes_old_generations() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(temp_dir.path()).unwrap();

        for generation in 1..=4 {
            store
                .save_checkpoint("batcher/main", generation, vec![generation as u8])
                .unwrap();
        }
        store.cleanup_old_checkpoints("batcher/main", 1).unwrap();

        let remaining = store.list_checkpoints("batcher/main").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].generation, 4);
    }

    #[test]
    fn test_interrupted_overwrite_keeps_previous_checkpoint() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(temp_dir.path()).unwrap();
        let dir = store.owner_dir("main");

        store.save_checkpoint("main", 1, b"old-state".to_vec()).unwrap();

        // Same generation again, dying once the new data is on disk
        let replacement = CheckpointMetadata::describe("main", 1, b"new-state");
        fs::write(FileCheckpointStore::data_file(&dir, &replacement), b"new-state").unwrap();

        let (meta, data) = store.latest_checkpoint("main").unwrap().unwrap();
        assert_eq!(meta.generation, 1);
        assert_eq!(data, b"old-state");

        // A completed overwrite wins and leaves no stray data behind
        store.save_checkpoint("main", 1, b"new-state".to_vec()).unwrap();
        let (_, data) = store.latest_checkpoint("main").unwrap().unwrap();
        assert_eq!(data, b"new-state");

        let data_files = fs::read_dir(&dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == DATA_EXT))
            .count();
        assert_eq!(data_files, 1);
    }
}
