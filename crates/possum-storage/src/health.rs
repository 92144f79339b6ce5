//! Storage health check

use opendal::Operator;

use possum_core::PossumResult;

/// Verify the blob store is reachable by listing the root
pub async fn check_health(op: &Operator) -> PossumResult<()> {
    op.list("/").await?;
    Ok(())
}

/// Returns true if storage is reachable, false otherwise (non-panicking)
pub async fn is_healthy(op: &Operator) -> bool {
    match check_health(op).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("storage health check failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_memory_operator;

    #[test]
    fn memory_store_is_healthy() {
        let op = build_memory_operator().unwrap();
        assert!(tokio_test::block_on(is_healthy(&op)));
    }
}
