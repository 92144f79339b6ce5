//! Block pipeline: upload, download, and verification using OpenDAL + possum-crypto
//!
//!   - `upload_file` / `upload_bytes`: split → per block {hash, tag, encrypt,
//!     extract terms} on blocking workers → put ciphertext → assemble → commit
//!   - `download_file`: fetch blocks in order → checksum → decrypt → re-hash →
//!     write to local path atomically
//!   - `verify_file`: check every block's tag against its recorded hash, and
//!     optionally the stored ciphertext itself
//!
//! Blocks are processed in parallel up to `PipelineOptions::concurrency`.
//! The catalog commit happens only after every block is stored, so a failed
//! or cancelled upload leaves no visible file; its stored blocks are removed
//! on a best-effort basis.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use opendal::{ErrorKind, Operator};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use possum_chunks::checksum::matches_hex;
use possum_chunks::{checksum_bytes, checksum_to_hex, hash_bytes, BlockReader};
use possum_core::config::{PossumConfig, StorageConfig};
use possum_core::{
    BlockRecord, BlockRef, FileInfo, PossumError, PossumResult, SearchHit,
    TagRecord,
};
use possum_crypto::{
    decrypt_block, encrypt_block, verify, verify_encoded, KeyRing, PublicKey, Tag,
};
use possum_index::{MetadataStore, TagExtractor};
use possum_storage::{blob, block_key, object_url};

use crate::assemble::{assemble, now_unix, ProcessedBlock};
use crate::mime::guess_mime;

/// Progress callback type (bytes_done, bytes_total, message)
pub type ProgressFn = Box<dyn Fn(u64, u64, &str) + Send + Sync>;

/// User metadata keys attached to each stored block object.
pub const META_BLOCK_ID: &str = "possum-block-id";
pub const META_CONTENT_HASH: &str = "possum-content-hash";
pub const META_TAG: &str = "possum-tag";
pub const META_CHECKSUM: &str = "possum-checksum";

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub block_size: usize,
    /// 0 = one worker per CPU
    pub concurrency: usize,
    /// Storage layout, used for object keys and URLs
    pub storage: StorageConfig,
}

impl PipelineOptions {
    pub fn from_config(config: &PossumConfig) -> Self {
        Self {
            block_size: config.pipeline.block_size,
            concurrency: config.pipeline.concurrency,
            storage: config.storage.clone(),
        }
    }

    pub fn workers(&self) -> usize {
        if self.concurrency > 0 {
            return self.concurrency;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_config(&PossumConfig::default())
    }
}

/// Shared handles for every pipeline operation. Cheap to clone.
#[derive(Clone)]
pub struct PipelineContext {
    pub op: Operator,
    pub store: Arc<dyn MetadataStore>,
    pub keys: Arc<KeyRing>,
    pub extractor: Arc<TagExtractor>,
    pub options: PipelineOptions,
}

impl PipelineContext {
    fn object_key(&self, file_id: &str, index: u64) -> String {
        block_key(&self.options.storage.prefix, file_id, index)
    }

    fn url(&self, key: &str) -> String {
        object_url(&self.options.storage, key)
    }
}

/// Result of uploading a single file
#[derive(Debug, Clone, Serialize)]
pub struct UploadResult {
    pub file_id: String,
    pub block_count: u64,
    pub bytes: u64,
    pub urls: Vec<String>,
    pub metadata: Map<String, Value>,
}

/// Result of downloading a single file
#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub file_id: String,
    pub local_path: PathBuf,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyMode {
    /// Tag against recorded hash, plus object presence
    Tags,
    /// Also fetch, checksum, decrypt, and re-hash the stored ciphertext
    Deep,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    Ok,
    /// Stored tag is not a valid G1 encoding
    TagMalformed,
    /// Tag parses but the pairing check failed
    TagInvalid,
    /// No object at the recorded key
    Missing,
    ChecksumMismatch,
    DecryptFailed,
    HashMismatch,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockVerdict {
    pub index: u64,
    pub block_id: String,
    pub status: BlockStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub file_id: String,
    pub mode: VerifyMode,
    pub blocks: Vec<BlockVerdict>,
}

impl VerifyReport {
    pub fn all_ok(&self) -> bool {
        self.blocks.iter().all(|b| b.status == BlockStatus::Ok)
    }

    pub fn failures(&self) -> impl Iterator<Item = &BlockVerdict> {
        self.blocks.iter().filter(|b| b.status != BlockStatus::Ok)
    }
}

fn worker_failed(e: JoinError) -> PossumError {
    PossumError::Other(anyhow::anyhow!("block worker failed: {e}"))
}

/// Upload a local file.
pub async fn upload_file(
    ctx: &PipelineContext,
    local_path: &Path,
    metadata: Map<String, Value>,
    cancel: &CancellationToken,
    progress: Option<&ProgressFn>,
) -> PossumResult<UploadResult> {
    let file = std::fs::File::open(local_path).map_err(|e| {
        PossumError::Input(format!("cannot open {}: {e}", local_path.display()))
    })?;
    let stat = file.metadata()?;
    if !stat.is_file() {
        return Err(PossumError::Input(format!(
            "{} is not a regular file",
            local_path.display()
        )));
    }
    let total = stat.len();
    let name = local_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    upload_reader(ctx, &name, file, total, metadata, cancel, progress).await
}

/// Upload an in-memory buffer under `name`.
pub async fn upload_bytes(
    ctx: &PipelineContext,
    name: &str,
    bytes: Vec<u8>,
    metadata: Map<String, Value>,
    cancel: &CancellationToken,
    progress: Option<&ProgressFn>,
) -> PossumResult<UploadResult> {
    let total = bytes.len() as u64;
    upload_reader(
        ctx,
        name,
        std::io::Cursor::new(bytes),
        total,
        metadata,
        cancel,
        progress,
    )
    .await
}

async fn upload_reader<R: Read + Send + 'static>(
    ctx: &PipelineContext,
    name: &str,
    reader: R,
    total: u64,
    metadata: Map<String, Value>,
    cancel: &CancellationToken,
    progress: Option<&ProgressFn>,
) -> PossumResult<UploadResult> {
    let blocks = BlockReader::new(reader, ctx.options.block_size)?;
    let file_id = Uuid::new_v4().to_string();
    info!(file_id = %file_id, name, bytes = total, "upload started");

    let mut spawned = 0u64;
    let processed = match store_blocks(ctx, &file_id, blocks, total, cancel, progress, &mut spawned)
        .await
    {
        Ok(p) => p,
        Err(e) => {
            warn!(file_id = %file_id, blocks = spawned, "upload aborted: {e}");
            discard_blocks(ctx, &file_id, spawned).await;
            return Err(e);
        }
    };

    let assembly = assemble(
        &file_id,
        name,
        guess_mime(name),
        processed,
        metadata,
        now_unix(),
    )?;
    let file_metadata = assembly.file.metadata.clone();
    let block_count = assembly.file.block_count;
    let bytes = assembly.file.size_bytes;
    let urls = assembly.urls;

    let store = ctx.store.clone();
    let (file, blocks, tags) = (assembly.file, assembly.blocks, assembly.tags);
    let committed = tokio::task::spawn_blocking(move || store.commit_file(file, blocks, tags))
        .await
        .map_err(worker_failed)
        .and_then(|r| r);
    if let Err(e) = committed {
        warn!(file_id = %file_id, "catalog commit failed: {e}");
        discard_blocks(ctx, &file_id, spawned).await;
        return Err(e);
    }

    info!(file_id = %file_id, blocks = block_count, bytes, "uploaded");
    Ok(UploadResult {
        file_id,
        block_count,
        bytes,
        urls,
        metadata: file_metadata,
    })
}

/// Seal and store every block, at most `workers()` at a time.
///
/// Cancellation is honoured between blocks: before reading the next one,
/// while waiting for a worker slot, and between completions.
async fn store_blocks<R: Read + Send + 'static>(
    ctx: &PipelineContext,
    file_id: &str,
    mut blocks: BlockReader<R>,
    total: u64,
    cancel: &CancellationToken,
    progress: Option<&ProgressFn>,
    spawned: &mut u64,
) -> PossumResult<Vec<ProcessedBlock>> {
    let limit = Arc::new(Semaphore::new(ctx.options.workers()));
    let mut tasks: JoinSet<PossumResult<ProcessedBlock>> = JoinSet::new();
    let mut done: Vec<ProcessedBlock> = Vec::new();
    let mut bytes_done = 0u64;

    let mut finish = |p: ProcessedBlock, done: &mut Vec<ProcessedBlock>| {
        bytes_done += p.record.size_bytes;
        if let Some(cb) = progress {
            cb(bytes_done, total, &format!("block {}", p.record.index));
        }
        done.push(p);
    };

    let outcome: PossumResult<()> = async {
        loop {
            if cancel.is_cancelled() {
                return Err(PossumError::Cancelled);
            }
            let (reader, next) = next_block(blocks).await?;
            blocks = reader;
            let Some(block) = next else { break };
            let block = block?;

            let permit = tokio::select! {
                permit = limit.clone().acquire_owned() => {
                    permit.map_err(|e| PossumError::Other(e.into()))?
                }
                _ = cancel.cancelled() => return Err(PossumError::Cancelled),
            };

            let index = *spawned;
            let worker = ctx.clone();
            let id = file_id.to_string();
            tasks.spawn(async move {
                let _permit = permit;
                seal_and_store(&worker, &id, index, block).await
            });
            *spawned += 1;

            while let Some(joined) = tasks.try_join_next() {
                finish(joined.map_err(worker_failed)??, &mut done);
            }
        }

        while let Some(joined) = tasks.join_next().await {
            finish(joined.map_err(worker_failed)??, &mut done);
            if cancel.is_cancelled() && !tasks.is_empty() {
                return Err(PossumError::Cancelled);
            }
        }
        Ok(())
    }
    .await;

    if outcome.is_err() {
        tasks.shutdown().await;
    }
    outcome.map(|()| done)
}

/// Read the next block on a blocking worker; the reader travels with it.
async fn next_block<R: Read + Send + 'static>(
    mut reader: BlockReader<R>,
) -> PossumResult<(BlockReader<R>, Option<std::io::Result<Vec<u8>>>)> {
    tokio::task::spawn_blocking(move || {
        let next = reader.next();
        (reader, next)
    })
    .await
    .map_err(worker_failed)
}

/// Hash, tag, encrypt, and extract one block, then store its ciphertext.
async fn seal_and_store(
    ctx: &PipelineContext,
    file_id: &str,
    index: u64,
    plaintext: Vec<u8>,
) -> PossumResult<ProcessedBlock> {
    let keys = ctx.keys.clone();
    let extractor = ctx.extractor.clone();
    let sealed = tokio::task::spawn_blocking(move || -> PossumResult<_> {
        let hash = hash_bytes(&plaintext);
        let tag = keys.tag_generator().generate(&hash)?;
        let encrypted = encrypt_block(keys.block_key(), &plaintext);
        let checksum = checksum_to_hex(&checksum_bytes(&encrypted.ciphertext));
        let analysis = extractor.analyze(&plaintext);
        Ok((hash, tag.to_hex(), encrypted, checksum, analysis, plaintext.len() as u64))
    })
    .await
    .map_err(worker_failed)??;
    let (hash, tag_hex, encrypted, checksum, analysis, size_bytes) = sealed;

    let block_id = BlockRecord::make_block_id(file_id, index);
    let key = ctx.object_key(file_id, index);

    let mut meta = HashMap::new();
    meta.insert(META_BLOCK_ID.to_string(), block_id.clone());
    meta.insert(META_CONTENT_HASH.to_string(), hash.to_hex());
    meta.insert(META_TAG.to_string(), tag_hex.clone());
    meta.insert(META_CHECKSUM.to_string(), checksum.clone());
    blob::put(&ctx.op, &key, encrypted.ciphertext, meta).await?;

    debug!(block_id = %block_id, bytes = size_bytes, terms = analysis.tags.len(), "block stored");

    let tags = analysis
        .tags
        .into_iter()
        .map(|t| TagRecord {
            block_id: block_id.clone(),
            term: t.term,
            kind: t.kind,
            relevance_score: t.score,
        })
        .collect();

    Ok(ProcessedBlock {
        url: ctx.url(&key),
        record: BlockRecord {
            block_id,
            file_id: file_id.to_string(),
            index,
            content_hash: hash,
            ciphertext_ref: key,
            nonce: encrypted.nonce,
            size_bytes,
            content_preview: analysis.preview,
            tag: tag_hex,
            ciphertext_checksum: checksum,
        },
        tags,
    })
}

async fn discard_blocks(ctx: &PipelineContext, file_id: &str, count: u64) {
    let keys: Vec<String> = (0..count).map(|i| ctx.object_key(file_id, i)).collect();
    blob::delete_quietly(&ctx.op, &keys).await;
}

fn unknown_file(file_id: &str) -> PossumError {
    PossumError::Input(format!("no such file: {file_id}"))
}

/// Load a file's blocks, checking they are all present in the catalog.
fn catalog_blocks(store: &dyn MetadataStore, file_id: &str) -> PossumResult<Vec<BlockRecord>> {
    let file = store
        .get_file(file_id)?
        .ok_or_else(|| unknown_file(file_id))?;
    let blocks = store.get_file_blocks(file_id)?;
    if blocks.len() as u64 != file.block_count {
        return Err(PossumError::Metadata(format!(
            "file {file_id} lists {} blocks but the catalog holds {}",
            file.block_count,
            blocks.len()
        )));
    }
    Ok(blocks)
}

/// Fetch, checksum, decrypt, and re-hash one block.
async fn open_block(ctx: &PipelineContext, block: &BlockRecord) -> PossumResult<Vec<u8>> {
    let ciphertext = blob::get(&ctx.op, &block.ciphertext_ref).await?;
    if !matches_hex(&ciphertext, &block.ciphertext_checksum) {
        return Err(PossumError::Integrity(format!(
            "ciphertext checksum mismatch for {}",
            block.block_id
        )));
    }

    let keys = ctx.keys.clone();
    let nonce = block.nonce;
    let plaintext =
        tokio::task::spawn_blocking(move || decrypt_block(keys.block_key(), &ciphertext, &nonce))
            .await
            .map_err(worker_failed)??;

    if hash_bytes(&plaintext) != block.content_hash {
        return Err(PossumError::Integrity(format!(
            "content hash mismatch for {}",
            block.block_id
        )));
    }
    Ok(plaintext)
}

/// Download a file by id and write it to `local_path`.
pub async fn download_file(
    ctx: &PipelineContext,
    file_id: &str,
    local_path: &Path,
    progress: Option<&ProgressFn>,
) -> PossumResult<DownloadResult> {
    let blocks = catalog_blocks(ctx.store.as_ref(), file_id)?;
    let total: u64 = blocks.iter().map(|b| b.size_bytes).sum();

    if let Some(parent) = local_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let tmp = local_path.with_extension("possum_tmp");
    let written = write_blocks(ctx, &blocks, &tmp, total, progress).await;
    let bytes = match written {
        Ok(bytes) => bytes,
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
    };
    tokio::fs::rename(&tmp, local_path).await?;

    info!(file_id, path = %local_path.display(), bytes, "downloaded");
    Ok(DownloadResult {
        file_id: file_id.to_string(),
        local_path: local_path.to_path_buf(),
        bytes,
    })
}

async fn write_blocks(
    ctx: &PipelineContext,
    blocks: &[BlockRecord],
    tmp: &Path,
    total: u64,
    progress: Option<&ProgressFn>,
) -> PossumResult<u64> {
    let mut out = tokio::fs::File::create(tmp).await?;
    let mut bytes = 0u64;
    for block in blocks {
        let plaintext = open_block(ctx, block).await?;
        out.write_all(&plaintext).await?;
        bytes += plaintext.len() as u64;
        debug!(block_id = %block.block_id, "block verified and written");
        if let Some(cb) = progress {
            cb(bytes, total, &format!("block {}", block.index));
        }
    }
    out.flush().await?;
    out.sync_all().await?;
    Ok(bytes)
}

/// `None` when the tag verifies, otherwise the failing status.
fn check_tag(public: &PublicKey, block: &BlockRecord) -> Option<BlockStatus> {
    match Tag::from_hex(&block.tag) {
        Ok(tag) if verify(public, &block.content_hash, &tag) => None,
        Ok(_) => Some(BlockStatus::TagInvalid),
        Err(_) => Some(BlockStatus::TagMalformed),
    }
}

/// Verify every block of a file.
///
/// Integrity problems are reported per block. Storage that cannot be reached
/// at all is an error, so callers can tell tampering from an outage.
pub async fn verify_file(
    ctx: &PipelineContext,
    file_id: &str,
    mode: VerifyMode,
) -> PossumResult<VerifyReport> {
    if mode == VerifyMode::Tags {
        return verify_tags(&ctx.op, ctx.store.as_ref(), ctx.keys.public_key(), file_id).await;
    }

    let blocks = catalog_blocks(ctx.store.as_ref(), file_id)?;
    let mut verdicts = Vec::with_capacity(blocks.len());
    for block in &blocks {
        let status = match check_tag(ctx.keys.public_key(), block) {
            Some(failed) => failed,
            None => opened_status(ctx, block).await?,
        };
        verdicts.push(verdict(block, status));
    }
    Ok(report(file_id, VerifyMode::Deep, verdicts))
}

/// Tags-mode verification with nothing but the public key.
///
/// Checks each block's tag against its recorded hash and that the ciphertext
/// object exists. Needs neither the block key nor the tag secret.
pub async fn verify_tags(
    op: &Operator,
    store: &dyn MetadataStore,
    public: &PublicKey,
    file_id: &str,
) -> PossumResult<VerifyReport> {
    let blocks = catalog_blocks(store, file_id)?;
    let mut verdicts = Vec::with_capacity(blocks.len());
    for block in &blocks {
        let status = match check_tag(public, block) {
            Some(failed) => failed,
            None => object_status(op, block).await?,
        };
        verdicts.push(verdict(block, status));
    }
    Ok(report(file_id, VerifyMode::Tags, verdicts))
}

fn verdict(block: &BlockRecord, status: BlockStatus) -> BlockVerdict {
    if status != BlockStatus::Ok {
        warn!(block_id = %block.block_id, ?status, "block failed verification");
    }
    BlockVerdict {
        index: block.index,
        block_id: block.block_id.clone(),
        status,
    }
}

fn report(file_id: &str, mode: VerifyMode, blocks: Vec<BlockVerdict>) -> VerifyReport {
    let report = VerifyReport {
        file_id: file_id.to_string(),
        mode,
        blocks,
    };
    info!(file_id, ?mode, ok = report.all_ok(), "verified");
    report
}

async fn object_status(op: &Operator, block: &BlockRecord) -> PossumResult<BlockStatus> {
    match blob::head(op, &block.ciphertext_ref).await {
        Ok(_) => Ok(BlockStatus::Ok),
        Err(PossumError::Storage(e)) if e.kind() == ErrorKind::NotFound => Ok(BlockStatus::Missing),
        Err(e) => Err(e),
    }
}

async fn opened_status(ctx: &PipelineContext, block: &BlockRecord) -> PossumResult<BlockStatus> {
    match open_block(ctx, block).await {
        Ok(_) => Ok(BlockStatus::Ok),
        Err(PossumError::Storage(e)) if e.kind() == ErrorKind::NotFound => Ok(BlockStatus::Missing),
        Err(PossumError::Integrity(msg)) if msg.starts_with("ciphertext checksum") => {
            Ok(BlockStatus::ChecksumMismatch)
        }
        Err(PossumError::Integrity(_)) => Ok(BlockStatus::HashMismatch),
        Err(PossumError::Crypto(_)) => Ok(BlockStatus::DecryptFailed),
        Err(e) => Err(e),
    }
}

/// Stateless re-check of a (hash, tag) pair under a public key.
///
/// Malformed encodings are errors; a well-formed pair that does not verify
/// is `Ok(false)`.
pub fn verify_block(public_hex: &str, hash_hex: &str, tag_hex: &str) -> PossumResult<bool> {
    Ok(verify_encoded(public_hex, hash_hex, tag_hex)?)
}

/// File record plus ordered block locations.
pub fn file_info(ctx: &PipelineContext, file_id: &str) -> PossumResult<Option<FileInfo>> {
    let Some(file) = ctx.store.get_file(file_id)? else {
        return Ok(None);
    };
    let blocks = ctx
        .store
        .get_file_blocks(file_id)?
        .into_iter()
        .map(|b| BlockRef {
            index: b.index,
            url: ctx.url(&b.ciphertext_ref),
            ciphertext_ref: b.ciphertext_ref,
        })
        .collect();
    Ok(Some(FileInfo { file, blocks }))
}

/// Keyword search over the catalog, with block URLs filled in.
pub fn search(ctx: &PipelineContext, query: &str, min_score: f64) -> PossumResult<Vec<SearchHit>> {
    let mut hits = possum_index::search(ctx.store.as_ref(), query, min_score)?;
    for hit in &mut hits {
        if let Some(block) = ctx.store.get_block(&hit.block_id)? {
            hit.url = Some(ctx.url(&block.ciphertext_ref));
        }
    }
    Ok(hits)
}

/// Drop every file, block, and tag record. Stored objects are untouched.
pub async fn clear(ctx: &PipelineContext) -> PossumResult<()> {
    let store = ctx.store.clone();
    tokio::task::spawn_blocking(move || store.clear())
        .await
        .map_err(worker_failed)??;
    info!("catalog cleared");
    Ok(())
}
