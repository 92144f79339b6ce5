//! Metadata catalog: file, block, and tag records
//!
//! A file becomes visible only through `commit_file`, which validates and
//! inserts the file record, every block record, and every tag in one step.
//! Writers are serialized behind a lock; readers never see a partial file.
//!
//! Two backends are available:
//!   - `MemoryStore`: process-local, for tests and dry runs.
//!   - `JsonStore`: the same catalog persisted to a JSON file, flushed
//!     atomically via temp+rename after every mutation. Writers in separate
//!     processes are serialized by an advisory lock on a sidecar file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use possum_core::{BlockRecord, FileRecord, PossumError, PossumResult, TagRecord};

pub trait MetadataStore: Send + Sync {
    /// Insert a file with all of its blocks and tags, or nothing at all.
    fn commit_file(
        &self,
        file: FileRecord,
        blocks: Vec<BlockRecord>,
        tags: Vec<TagRecord>,
    ) -> PossumResult<()>;

    fn get_file(&self, file_id: &str) -> PossumResult<Option<FileRecord>>;

    /// Blocks of a file ordered by index. Empty for an unknown file.
    fn get_file_blocks(&self, file_id: &str) -> PossumResult<Vec<BlockRecord>>;

    fn get_block(&self, block_id: &str) -> PossumResult<Option<BlockRecord>>;

    fn block_tags(&self, block_id: &str) -> PossumResult<Vec<TagRecord>>;

    /// Tags whose term contains `query` and whose score is at least
    /// `min_score`, in insertion order.
    fn find_tags(&self, query: &str, min_score: f64) -> PossumResult<Vec<TagRecord>>;

    fn list_files(&self) -> PossumResult<Vec<FileRecord>>;

    fn clear(&self) -> PossumResult<()>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Catalog {
    files: Vec<FileRecord>,
    blocks: Vec<BlockRecord>,
    tags: Vec<TagRecord>,
}

impl Catalog {
    fn check_commit(
        &self,
        file: &FileRecord,
        blocks: &[BlockRecord],
        tags: &[TagRecord],
    ) -> PossumResult<()> {
        if self.files.iter().any(|f| f.file_id == file.file_id) {
            return Err(PossumError::Metadata(format!(
                "file {} already exists",
                file.file_id
            )));
        }
        if blocks.len() as u64 != file.block_count {
            return Err(PossumError::Metadata(format!(
                "file {} declares {} blocks but {} were supplied",
                file.file_id,
                file.block_count,
                blocks.len()
            )));
        }

        let mut seen = vec![false; blocks.len()];
        for block in blocks {
            if block.file_id != file.file_id {
                return Err(PossumError::Metadata(format!(
                    "block {} belongs to file {}, not {}",
                    block.block_id, block.file_id, file.file_id
                )));
            }
            let slot = usize::try_from(block.index)
                .ok()
                .and_then(|i| seen.get_mut(i))
                .ok_or_else(|| {
                    PossumError::Metadata(format!(
                        "block index {} out of range for {} blocks",
                        block.index, file.block_count
                    ))
                })?;
            if *slot {
                return Err(PossumError::Metadata(format!(
                    "duplicate block index {}",
                    block.index
                )));
            }
            *slot = true;
            if self.blocks.iter().any(|b| b.block_id == block.block_id) {
                return Err(PossumError::Metadata(format!(
                    "block {} already exists",
                    block.block_id
                )));
            }
        }

        let ids: HashSet<&str> = blocks.iter().map(|b| b.block_id.as_str()).collect();
        if let Some(orphan) = tags.iter().find(|t| !ids.contains(t.block_id.as_str())) {
            return Err(PossumError::Metadata(format!(
                "tag '{}' references unknown block {}",
                orphan.term, orphan.block_id
            )));
        }
        Ok(())
    }

    fn commit(
        &mut self,
        file: FileRecord,
        mut blocks: Vec<BlockRecord>,
        tags: Vec<TagRecord>,
    ) -> PossumResult<()> {
        self.check_commit(&file, &blocks, &tags)?;
        blocks.sort_by_key(|b| b.index);
        self.files.push(file);
        self.blocks.extend(blocks);
        self.tags.extend(tags);
        Ok(())
    }

    fn get_file(&self, file_id: &str) -> Option<FileRecord> {
        self.files.iter().find(|f| f.file_id == file_id).cloned()
    }

    fn get_file_blocks(&self, file_id: &str) -> Vec<BlockRecord> {
        let mut blocks: Vec<BlockRecord> = self
            .blocks
            .iter()
            .filter(|b| b.file_id == file_id)
            .cloned()
            .collect();
        blocks.sort_by_key(|b| b.index);
        blocks
    }

    fn get_block(&self, block_id: &str) -> Option<BlockRecord> {
        self.blocks.iter().find(|b| b.block_id == block_id).cloned()
    }

    fn block_tags(&self, block_id: &str) -> Vec<TagRecord> {
        self.tags
            .iter()
            .filter(|t| t.block_id == block_id)
            .cloned()
            .collect()
    }

    fn find_tags(&self, query: &str, min_score: f64) -> Vec<TagRecord> {
        self.tags
            .iter()
            .filter(|t| t.relevance_score >= min_score && t.term.contains(query))
            .cloned()
            .collect()
    }
}

fn poisoned<T>(_: T) -> PossumError {
    PossumError::Metadata("catalog lock poisoned".into())
}

/// In-memory catalog.
#[derive(Debug, Default)]
pub struct MemoryStore {
    catalog: RwLock<Catalog>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> PossumResult<RwLockReadGuard<'_, Catalog>> {
        self.catalog.read().map_err(poisoned)
    }

    fn write(&self) -> PossumResult<RwLockWriteGuard<'_, Catalog>> {
        self.catalog.write().map_err(poisoned)
    }
}

impl MetadataStore for MemoryStore {
    fn commit_file(
        &self,
        file: FileRecord,
        blocks: Vec<BlockRecord>,
        tags: Vec<TagRecord>,
    ) -> PossumResult<()> {
        self.write()?.commit(file, blocks, tags)
    }

    fn get_file(&self, file_id: &str) -> PossumResult<Option<FileRecord>> {
        Ok(self.read()?.get_file(file_id))
    }

    fn get_file_blocks(&self, file_id: &str) -> PossumResult<Vec<BlockRecord>> {
        Ok(self.read()?.get_file_blocks(file_id))
    }

    fn get_block(&self, block_id: &str) -> PossumResult<Option<BlockRecord>> {
        Ok(self.read()?.get_block(block_id))
    }

    fn block_tags(&self, block_id: &str) -> PossumResult<Vec<TagRecord>> {
        Ok(self.read()?.block_tags(block_id))
    }

    fn find_tags(&self, query: &str, min_score: f64) -> PossumResult<Vec<TagRecord>> {
        Ok(self.read()?.find_tags(query, min_score))
    }

    fn list_files(&self) -> PossumResult<Vec<FileRecord>> {
        Ok(self.read()?.files.clone())
    }

    fn clear(&self) -> PossumResult<()> {
        *self.write()? = Catalog::default();
        Ok(())
    }
}

fn load_catalog(path: &Path) -> PossumResult<Catalog> {
    if !path.exists() {
        return Ok(Catalog::default());
    }
    let content = std::fs::read_to_string(path).map_err(|e| {
        PossumError::Metadata(format!("reading catalog {}: {e}", path.display()))
    })?;
    serde_json::from_str(&content)
        .map_err(|e| PossumError::Metadata(format!("parsing catalog {}: {e}", path.display())))
}

/// Catalog persisted to a JSON file.
///
/// Every mutation takes an exclusive lock on a sidecar `.lock` file, re-reads
/// the catalog from disk, applies the change, flushes, and only then swaps the
/// result in. Writers in other processes are serialized the same way, and a
/// failed write leaves both the file and the in-memory view unchanged.
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    catalog: RwLock<Catalog>,
}

impl JsonStore {
    /// Load the catalog at `path`, or start empty if the file doesn't exist.
    pub fn open(path: &Path) -> PossumResult<Self> {
        let catalog = load_catalog(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            catalog: RwLock::new(catalog),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> PossumResult<RwLockReadGuard<'_, Catalog>> {
        self.catalog.read().map_err(poisoned)
    }

    fn ensure_dir(&self) -> PossumResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PossumError::Metadata(format!("creating catalog dir {}: {e}", parent.display()))
                })?;
            }
        }
        Ok(())
    }

    /// Exclusive advisory lock on `<catalog>.lock`, held until the handle drops.
    fn lock(&self) -> PossumResult<std::fs::File> {
        self.ensure_dir()?;
        let lock_path = self.path.with_extension("lock");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| {
                PossumError::Metadata(format!("opening catalog lock {}: {e}", lock_path.display()))
            })?;
        file.lock_exclusive().map_err(|e| {
            PossumError::Metadata(format!("locking catalog {}: {e}", lock_path.display()))
        })?;
        Ok(file)
    }

    fn flush(&self, catalog: &Catalog) -> PossumResult<()> {
        let json = serde_json::to_string_pretty(catalog)?;

        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, &json).map_err(|e| {
            PossumError::Metadata(format!("writing catalog temp {}: {e}", tmp_path.display()))
        })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            PossumError::Metadata(format!("renaming catalog {}: {e}", self.path.display()))
        })?;
        Ok(())
    }

    fn mutate(&self, f: impl FnOnce(&mut Catalog) -> PossumResult<()>) -> PossumResult<()> {
        let mut guard = self.catalog.write().map_err(poisoned)?;
        let _lock = self.lock()?;
        // Other processes may have committed since this handle last looked.
        let mut next = load_catalog(&self.path)?;
        f(&mut next)?;
        self.flush(&next)?;
        *guard = next;
        Ok(())
    }
}

impl MetadataStore for JsonStore {
    fn commit_file(
        &self,
        file: FileRecord,
        blocks: Vec<BlockRecord>,
        tags: Vec<TagRecord>,
    ) -> PossumResult<()> {
        let file_id = file.file_id.clone();
        self.mutate(|c| c.commit(file, blocks, tags))?;
        tracing::debug!(file_id = %file_id, path = %self.path.display(), "catalog committed");
        Ok(())
    }

    fn get_file(&self, file_id: &str) -> PossumResult<Option<FileRecord>> {
        Ok(self.read()?.get_file(file_id))
    }

    fn get_file_blocks(&self, file_id: &str) -> PossumResult<Vec<BlockRecord>> {
        Ok(self.read()?.get_file_blocks(file_id))
    }

    fn get_block(&self, block_id: &str) -> PossumResult<Option<BlockRecord>> {
        Ok(self.read()?.get_block(block_id))
    }

    fn block_tags(&self, block_id: &str) -> PossumResult<Vec<TagRecord>> {
        Ok(self.read()?.block_tags(block_id))
    }

    fn find_tags(&self, query: &str, min_score: f64) -> PossumResult<Vec<TagRecord>> {
        Ok(self.read()?.find_tags(query, min_score))
    }

    fn list_files(&self) -> PossumResult<Vec<FileRecord>> {
        Ok(self.read()?.files.clone())
    }

    fn clear(&self) -> PossumResult<()> {
        self.mutate(|c| {
            *c = Catalog::default();
            Ok(())
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use possum_core::{BlockNonce, ContentHash, TagKind};

    pub(crate) fn file(id: &str, name: &str, blocks: u64) -> FileRecord {
        FileRecord {
            file_id: id.into(),
            original_name: name.into(),
            mime_type: "text/plain".into(),
            size_bytes: blocks * 10,
            created_at: 0,
            block_count: blocks,
            metadata: serde_json::Map::new(),
        }
    }

    pub(crate) fn block(file_id: &str, index: u64, preview: &str) -> BlockRecord {
        BlockRecord {
            block_id: BlockRecord::make_block_id(file_id, index),
            file_id: file_id.into(),
            index,
            content_hash: ContentHash::from_bytes([index as u8; 32]),
            ciphertext_ref: format!("blocks/{file_id}/{index}"),
            nonce: BlockNonce::from_bytes([0u8; 16]),
            size_bytes: 10,
            content_preview: preview.into(),
            tag: String::new(),
            ciphertext_checksum: String::new(),
        }
    }

    pub(crate) fn tag(block_id: &str, term: &str, score: f64) -> TagRecord {
        TagRecord {
            block_id: block_id.into(),
            term: term.into(),
            kind: TagKind::Tfidf,
            relevance_score: score,
        }
    }

    fn exercise(store: &dyn MetadataStore) {
        let blocks = vec![block("f1", 1, "b"), block("f1", 0, "a")];
        let tags = vec![tag("f1_block_0", "storage", 0.8), tag("f1_block_1", "storage node", 0.4)];
        store.commit_file(file("f1", "a.txt", 2), blocks, tags).unwrap();

        let ordered = store.get_file_blocks("f1").unwrap();
        assert_eq!(ordered.iter().map(|b| b.index).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(store.get_file("f1").unwrap().unwrap().original_name, "a.txt");
        assert!(store.get_file("nope").unwrap().is_none());
        assert_eq!(store.get_block("f1_block_1").unwrap().unwrap().index, 1);
        assert_eq!(store.block_tags("f1_block_0").unwrap().len(), 1);

        let found = store.find_tags("stor", 0.5).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].block_id, "f1_block_0");
        assert_eq!(store.find_tags("stor", 0.0).unwrap().len(), 2);

        // duplicate file id
        let err = store
            .commit_file(file("f1", "again.txt", 1), vec![block("f1", 0, "")], vec![])
            .unwrap_err();
        assert!(matches!(err, PossumError::Metadata(_)));

        store.clear().unwrap();
        assert!(store.list_files().unwrap().is_empty());
        assert!(store.find_tags("", 0.0).unwrap().is_empty());
    }

    #[test]
    fn memory_store_behaves() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn json_store_behaves() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&JsonStore::open(&dir.path().join("catalog.json")).unwrap());
    }

    #[test]
    fn gap_in_indices_is_rejected_and_nothing_is_visible() {
        let store = MemoryStore::new();
        let blocks = vec![block("f1", 0, ""), block("f1", 2, "")];
        let err = store.commit_file(file("f1", "a", 2), blocks, vec![]).unwrap_err();
        assert!(matches!(err, PossumError::Metadata(_)));
        assert!(store.get_file("f1").unwrap().is_none());
        assert!(store.get_file_blocks("f1").unwrap().is_empty());
    }

    #[test]
    fn block_count_mismatch_is_rejected() {
        let store = MemoryStore::new();
        let err = store
            .commit_file(file("f1", "a", 3), vec![block("f1", 0, "")], vec![])
            .unwrap_err();
        assert!(matches!(err, PossumError::Metadata(_)));
    }

    #[test]
    fn orphan_tag_is_rejected() {
        let store = MemoryStore::new();
        let err = store
            .commit_file(
                file("f1", "a", 1),
                vec![block("f1", 0, "")],
                vec![tag("other_block_0", "x", 0.5)],
            )
            .unwrap_err();
        assert!(matches!(err, PossumError::Metadata(_)));
        assert!(store.list_files().unwrap().is_empty());
    }

    #[test]
    fn empty_file_commits_with_no_blocks() {
        let store = MemoryStore::new();
        store.commit_file(file("empty", "e", 0), vec![], vec![]).unwrap();
        assert!(store.get_file_blocks("empty").unwrap().is_empty());
        assert_eq!(store.list_files().unwrap().len(), 1);
    }

    #[test]
    fn json_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("catalog.json");
        {
            let store = JsonStore::open(&path).unwrap();
            store
                .commit_file(
                    file("f1", "a.txt", 1),
                    vec![block("f1", 0, "hello")],
                    vec![tag("f1_block_0", "hello", 1.0)],
                )
                .unwrap();
        }
        let reopened = JsonStore::open(&path).unwrap();
        assert_eq!(reopened.get_file_blocks("f1").unwrap()[0].content_preview, "hello");
        assert_eq!(reopened.find_tags("hell", 0.5).unwrap().len(), 1);

        reopened.clear().unwrap();
        assert!(JsonStore::open(&path).unwrap().list_files().unwrap().is_empty());
    }

    #[test]
    fn separate_handles_keep_each_others_commits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let a = JsonStore::open(&path).unwrap();
        let b = JsonStore::open(&path).unwrap();

        a.commit_file(file("fa", "a.txt", 1), vec![block("fa", 0, "")], vec![])
            .unwrap();
        b.commit_file(file("fb", "b.txt", 1), vec![block("fb", 0, "")], vec![])
            .unwrap();

        let mut ids: Vec<_> = JsonStore::open(&path)
            .unwrap()
            .list_files()
            .unwrap()
            .into_iter()
            .map(|f| f.file_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["fa", "fb"]);
        // the writing handle also picks up what it re-read
        assert!(b.get_file("fa").unwrap().is_some());
    }

    #[test]
    fn concurrent_writers_on_one_path_lose_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let store = JsonStore::open(&path).unwrap();
                    let id = format!("f{i}");
                    store
                        .commit_file(file(&id, "x", 1), vec![block(&id, 0, "")], vec![])
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(JsonStore::open(&path).unwrap().list_files().unwrap().len(), 8);
    }

    #[test]
    fn corrupt_catalog_is_metadata_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(JsonStore::open(&path), Err(PossumError::Metadata(_))));
    }
}
