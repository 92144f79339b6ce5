//! Metadata assembly: per-block outputs → one committable file
//!
//! Runs after every block of an upload is durable in the blob store. Checks
//! that the blocks form `0..n` for a single file, sums sizes, and builds the
//! `FileRecord` with its metadata map. Nothing here touches storage.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};

use possum_core::{BlockRecord, FileRecord, PossumError, PossumResult, TagRecord};

/// Keys the assembler owns in `FileRecord::metadata`.
pub const RESERVED_KEYS: &[&str] = &["original_name", "size", "block_count", "created_at", "urls"];

/// Everything produced for one block by the upload workers.
#[derive(Debug, Clone)]
pub struct ProcessedBlock {
    pub record: BlockRecord,
    pub tags: Vec<TagRecord>,
    pub url: String,
}

/// A file ready for `MetadataStore::commit_file`.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub file: FileRecord,
    pub blocks: Vec<BlockRecord>,
    pub tags: Vec<TagRecord>,
    pub urls: Vec<String>,
}

pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Build the file record from completed blocks, in any order.
///
/// Caller metadata is merged in, except for the reserved keys, which always
/// reflect the stored content.
pub fn assemble(
    file_id: &str,
    original_name: &str,
    mime_type: &str,
    mut processed: Vec<ProcessedBlock>,
    extra: Map<String, Value>,
    created_at: u64,
) -> PossumResult<Assembly> {
    processed.sort_by_key(|p| p.record.index);

    for (expected, p) in processed.iter().enumerate() {
        if p.record.file_id != file_id {
            return Err(PossumError::Metadata(format!(
                "block {} belongs to file {}, not {file_id}",
                p.record.block_id, p.record.file_id
            )));
        }
        if p.record.index != expected as u64 {
            return Err(PossumError::Metadata(format!(
                "blocks of {file_id} are not contiguous: expected index {expected}, found {}",
                p.record.index
            )));
        }
    }

    let size_bytes: u64 = processed.iter().map(|p| p.record.size_bytes).sum();
    let block_count = processed.len() as u64;

    let mut blocks = Vec::with_capacity(processed.len());
    let mut tags = Vec::new();
    let mut urls = Vec::with_capacity(processed.len());
    for p in processed {
        blocks.push(p.record);
        tags.extend(p.tags);
        urls.push(p.url);
    }

    let mut metadata = Map::new();
    metadata.insert("original_name".into(), Value::from(original_name));
    metadata.insert("size".into(), Value::from(size_bytes));
    metadata.insert("block_count".into(), Value::from(block_count));
    metadata.insert("created_at".into(), Value::from(created_at));
    metadata.insert(
        "urls".into(),
        Value::Array(urls.iter().cloned().map(Value::from).collect()),
    );
    for (key, value) in extra {
        if RESERVED_KEYS.contains(&key.as_str()) {
            tracing::warn!(key = %key, "ignoring caller metadata for reserved key");
            continue;
        }
        metadata.insert(key, value);
    }

    Ok(Assembly {
        file: FileRecord {
            file_id: file_id.to_string(),
            original_name: original_name.to_string(),
            mime_type: mime_type.to_string(),
            size_bytes,
            created_at,
            block_count,
            metadata,
        },
        blocks,
        tags,
        urls,
    })
}
