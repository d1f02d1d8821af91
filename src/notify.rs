//! Reporting of failures the background loops swallow

use crate::errors::PoolError;
use crate::member::PoolId;
use async_trait::async_trait;

/// Receives unrecoverable errors from the size manager
///
/// The manager keeps running after calling `notify`; implementations decide
/// whether to page someone, record the failure, or ignore it.
#[async_trait]
pub trait ErrorNotifier: Send + Sync {
    async fn notify(&self, pool: PoolId, error: &PoolError);
}

/// Notifier that writes errors to the `tracing` error level
#[derive(Debug, Clone, Copy, Default)]
pub struct LogErrorNotifier;

#[async_trait]
impl ErrorNotifier for LogErrorNotifier {
    async fn notify(&self, pool: PoolId, error: &PoolError) {
        tracing::error!(pool = %pool, error = %error, "resource pool error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_notifier_accepts_errors() {
        LogErrorNotifier
            .notify(PoolId::from_raw(9), &PoolError::CreationFailed("boom".to_string()))
            .await;
    }
}
