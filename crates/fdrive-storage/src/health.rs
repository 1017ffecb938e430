//! Storage health check

use anyhow::Result;
use opendal::Operator;

/// Verify the storage backend is reachable by listing the root
pub async fn check_health(op: &Operator) -> Result<()> {
    op.list("/")
        .await
        .map(|_| ())
        .map_err(|e| anyhow::anyhow!("storage health check failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_is_healthy() {
        let op = crate::operator::memory_operator().unwrap();
        assert!(check_health(&op).await.is_ok());
    }
}
