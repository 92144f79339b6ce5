//! Encrypted block objects
//!
//! Blocks live at `{prefix}/{file_id}/{index}`. Each put may carry user
//! metadata (block id, content hash, tag, checksum) when the backend can
//! store it; the catalog remains the source of truth either way.

use std::collections::HashMap;

use opendal::Operator;

use possum_core::config::StorageConfig;
use possum_core::PossumResult;

/// Object key for block `index` of `file_id`.
pub fn block_key(prefix: &str, file_id: &str, index: u64) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{file_id}/{index}")
    } else {
        format!("{prefix}/{file_id}/{index}")
    }
}

/// Path-style URL of an object: `{endpoint}/{bucket}/{key}`.
pub fn object_url(config: &StorageConfig, key: &str) -> String {
    format!(
        "{}/{}/{}",
        config.endpoint.trim_end_matches('/'),
        config.bucket,
        key.trim_start_matches('/')
    )
}

/// Write `bytes` at `key`, attaching `meta` as user metadata when the
/// backend supports it.
pub async fn put(
    op: &Operator,
    key: &str,
    bytes: Vec<u8>,
    meta: HashMap<String, String>,
) -> PossumResult<()> {
    let len = bytes.len();
    if !meta.is_empty() && op.info().full_capability().write_with_user_metadata {
        op.write_with(key, bytes).user_metadata(meta).await?;
    } else {
        op.write(key, bytes).await?;
    }
    tracing::debug!(key, bytes = len, "blob written");
    Ok(())
}

pub async fn get(op: &Operator, key: &str) -> PossumResult<Vec<u8>> {
    let buf = op.read(key).await?;
    Ok(buf.to_vec())
}

/// Object metadata: `content-length`, `etag` when known, plus any user
/// metadata stored with the object.
pub async fn head(op: &Operator, key: &str) -> PossumResult<HashMap<String, String>> {
    let meta = op.stat(key).await?;
    let mut out = HashMap::new();
    out.insert("content-length".to_string(), meta.content_length().to_string());
    if let Some(etag) = meta.etag() {
        out.insert("etag".to_string(), etag.to_string());
    }
    if let Some(user) = meta.user_metadata() {
        for (k, v) in user {
            out.insert(k.clone(), v.clone());
        }
    }
    Ok(out)
}

/// Best-effort removal, used to discard blocks of an upload that never
/// committed.
pub async fn delete_quietly(op: &Operator, keys: &[String]) {
    for key in keys {
        if let Err(e) = op.delete(key).await {
            tracing::warn!(key = %key, "failed to remove orphaned block: {e}");
        }
    }
}
