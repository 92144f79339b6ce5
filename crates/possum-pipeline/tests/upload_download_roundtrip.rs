//! Integration tests for the upload → download → verify pipeline.
//!
//! Uses an in-memory OpenDAL operator so no external storage is needed.

use std::collections::HashSet;
use std::sync::Arc;

use possum_core::PossumError;
use possum_crypto::KeyRing;
use possum_index::{JsonStore, MemoryStore, MetadataStore, TagExtractor};
use possum_pipeline::{
    download_file, file_info, search, upload_bytes, upload_file, verify_block, verify_file,
    PipelineContext, PipelineOptions, VerifyMode,
};
use serde_json::Map;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const MIB: usize = 1024 * 1024;

fn context(block_size: usize, store: Arc<dyn MetadataStore>) -> PipelineContext {
    PipelineContext {
        op: possum_storage::build_memory_operator().expect("memory operator"),
        store,
        keys: Arc::new(KeyRing::generate()),
        extractor: Arc::new(TagExtractor::default()),
        options: PipelineOptions {
            block_size,
            concurrency: 4,
            ..Default::default()
        },
    }
}

fn memory_context(block_size: usize) -> PipelineContext {
    context(block_size, Arc::new(MemoryStore::new()))
}

/// Bytes that differ between blocks.
fn patterned(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i.wrapping_mul(31) ^ (i >> 11)) as u8)
        .collect()
}

#[tokio::test]
async fn two_and_a_half_mib_makes_three_blocks() {
    let tmp = TempDir::new().unwrap();
    let ctx = memory_context(MIB);
    let original = patterned(2 * MIB + MIB / 2);
    let src = tmp.path().join("big.bin");
    std::fs::write(&src, &original).unwrap();

    let upload = upload_file(&ctx, &src, Map::new(), &CancellationToken::new(), None)
        .await
        .expect("upload should succeed");

    assert_eq!(upload.block_count, 3);
    assert_eq!(upload.bytes, original.len() as u64);
    assert_eq!(upload.urls.len(), 3);

    let blocks = ctx.store.get_file_blocks(&upload.file_id).unwrap();
    let sizes: Vec<u64> = blocks.iter().map(|b| b.size_bytes).collect();
    assert_eq!(sizes, vec![MIB as u64, MIB as u64, (MIB / 2) as u64]);

    let nonces: HashSet<_> = blocks.iter().map(|b| b.nonce.to_base64()).collect();
    assert_eq!(nonces.len(), 3, "every block gets a fresh nonce");
    let hashes: HashSet<_> = blocks.iter().map(|b| b.content_hash).collect();
    assert_eq!(hashes.len(), 3);

    for (i, b) in blocks.iter().enumerate() {
        assert_eq!(b.index, i as u64);
        assert_eq!(b.block_id, format!("{}_block_{i}", upload.file_id));
        assert!(b.content_preview.is_empty() || b.content_preview.chars().count() <= 200);
    }

    let file = ctx.store.get_file(&upload.file_id).unwrap().unwrap();
    assert_eq!(file.original_name, "big.bin");
    assert_eq!(file.mime_type, "application/octet-stream");
    assert_eq!(file.metadata["block_count"], 3);
}

#[tokio::test]
async fn upload_download_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let ctx = memory_context(4096);
    let original = patterned(10 * 4096 + 17);

    let upload = upload_bytes(&ctx, "data.bin", original.clone(), Map::new(), &CancellationToken::new(), None)
        .await
        .unwrap();
    let dst = tmp.path().join("out/data.bin");
    let download = download_file(&ctx, &upload.file_id, &dst, None).await.unwrap();

    assert_eq!(download.bytes, original.len() as u64);
    assert_eq!(std::fs::read(&dst).unwrap(), original);
    assert!(!dst.with_extension("possum_tmp").exists());
}

#[tokio::test]
async fn block_size_boundaries_roundtrip() {
    let bs = 64;
    let ctx = memory_context(bs);
    let tmp = TempDir::new().unwrap();

    for len in [0, 1, bs - 1, bs, bs + 1, 10 * bs] {
        let original = patterned(len);
        let upload = upload_bytes(&ctx, "b.bin", original.clone(), Map::new(), &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(upload.block_count, len.div_ceil(bs) as u64, "len {len}");

        let dst = tmp.path().join(format!("b{len}.bin"));
        download_file(&ctx, &upload.file_id, &dst, None).await.unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), original, "len {len}");
    }
}

#[tokio::test]
async fn verify_tags_and_deep_pass_on_untouched_file() {
    let ctx = memory_context(1000);
    let upload = upload_bytes(&ctx, "v.txt", patterned(3500), Map::new(), &CancellationToken::new(), None)
        .await
        .unwrap();

    let tags = verify_file(&ctx, &upload.file_id, VerifyMode::Tags).await.unwrap();
    assert_eq!(tags.blocks.len(), 4);
    assert!(tags.all_ok());

    let deep = verify_file(&ctx, &upload.file_id, VerifyMode::Deep).await.unwrap();
    assert!(deep.all_ok());
}

#[tokio::test]
async fn stored_pair_rechecks_with_public_key_only() {
    let ctx = memory_context(1000);
    let upload = upload_bytes(&ctx, "p.txt", patterned(1500), Map::new(), &CancellationToken::new(), None)
        .await
        .unwrap();
    let blocks = ctx.store.get_file_blocks(&upload.file_id).unwrap();
    let public = ctx.keys.public_key().to_hex();

    for b in &blocks {
        assert!(verify_block(&public, &b.content_hash.to_hex(), &b.tag).unwrap());
    }
    // block 0's tag does not vouch for block 1's hash
    assert!(!verify_block(&public, &blocks[1].content_hash.to_hex(), &blocks[0].tag).unwrap());
    assert!(matches!(
        verify_block(&public, "not-hex", &blocks[0].tag),
        Err(PossumError::Crypto(_))
    ));
}

#[tokio::test]
async fn text_blocks_are_indexed_and_searchable() {
    let ctx = memory_context(MIB);
    let cancel = CancellationToken::new();

    let a = upload_bytes(
        &ctx,
        "pairings.txt",
        b"bilinear pairing pairing pairing curves and pairing groups".to_vec(),
        Map::new(),
        &cancel,
        None,
    )
    .await
    .unwrap();
    let b = upload_bytes(
        &ctx,
        "storage.txt",
        b"encrypted storage pairing".to_vec(),
        Map::new(),
        &cancel,
        None,
    )
    .await
    .unwrap();

    let hits = search(&ctx, "PAIR", 0.1).unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].file_id, a.file_id, "dominant term ranks first");
    assert_eq!(hits[1].file_id, b.file_id);
    assert!(hits[0].relevance_score >= hits[1].relevance_score);
    assert_eq!(hits[0].original_name, "pairings.txt");
    assert!(hits[0].tags.iter().all(|t| t.contains("pair")));
    assert!(hits[0].url.as_deref().unwrap().ends_with("/0"));

    let strict = search(&ctx, "pair", 0.99).unwrap();
    assert!(strict.iter().all(|h| h.relevance_score >= 0.99));
}

#[tokio::test]
async fn binary_blocks_have_no_terms() {
    let ctx = memory_context(MIB);
    let upload = upload_bytes(&ctx, "x.bin", vec![0xFF, 0xFE, 0x00, 0x80], Map::new(), &CancellationToken::new(), None)
        .await
        .unwrap();
    let blocks = ctx.store.get_file_blocks(&upload.file_id).unwrap();
    assert_eq!(blocks[0].content_preview, "");
    assert!(ctx.store.block_tags(&blocks[0].block_id).unwrap().is_empty());
}

#[tokio::test]
async fn caller_metadata_and_file_info() {
    let ctx = memory_context(10);
    let mut meta = Map::new();
    meta.insert("owner".into(), "ops".into());

    let upload = upload_bytes(&ctx, "notes.txt", b"0123456789abcdef".to_vec(), meta, &CancellationToken::new(), None)
        .await
        .unwrap();
    assert_eq!(upload.metadata["owner"], "ops");

    let info = file_info(&ctx, &upload.file_id).unwrap().unwrap();
    assert_eq!(info.file.mime_type, "text/plain");
    assert_eq!(info.blocks.len(), 2);
    assert_eq!(info.blocks[1].index, 1);
    assert!(info.blocks[1].url.ends_with(&info.blocks[1].ciphertext_ref));

    assert!(file_info(&ctx, "missing").unwrap().is_none());
}

#[tokio::test]
async fn json_catalog_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let catalog = tmp.path().join("catalog.json");
    let ctx = context(100, Arc::new(JsonStore::open(&catalog).unwrap()));

    let original = patterned(450);
    let upload = upload_bytes(&ctx, "j.bin", original.clone(), Map::new(), &CancellationToken::new(), None)
        .await
        .unwrap();

    let reopened = PipelineContext {
        store: Arc::new(JsonStore::open(&catalog).unwrap()),
        ..ctx.clone()
    };
    let dst = tmp.path().join("j.out");
    download_file(&reopened, &upload.file_id, &dst, None).await.unwrap();
    assert_eq!(std::fs::read(&dst).unwrap(), original);
}

#[tokio::test]
async fn unknown_file_is_input_error() {
    let tmp = TempDir::new().unwrap();
    let ctx = memory_context(100);
    let err = download_file(&ctx, "nope", &tmp.path().join("x"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, PossumError::Input(_)));

    let err = upload_file(&ctx, &tmp.path().join("absent.txt"), Map::new(), &CancellationToken::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, PossumError::Input(_)));
}

#[tokio::test]
async fn zero_block_size_is_input_error() {
    let ctx = memory_context(0);
    let err = upload_bytes(&ctx, "z", vec![1, 2, 3], Map::new(), &CancellationToken::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, PossumError::Input(_)));
    assert!(ctx.store.list_files().unwrap().is_empty());
}
