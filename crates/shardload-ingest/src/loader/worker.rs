//! Per-chunk load protocol: begin, copy, commit or roll back

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{BulkCopyStore, CopyTransaction, LoadTarget};
use crate::batch::Chunk;
use crate::error::LoadError;

/// Load one chunk in its own transaction
///
/// The copy stream is finalized exactly once per chunk, including empty
/// chunks, which still commit a zero-row transaction. If `cancel` fires
/// before commit the in-flight copy is dropped and the transaction rolled back.
pub(crate) async fn load_chunk<S>(
    store: Arc<S>,
    target: Arc<LoadTarget>,
    chunk: Chunk,
    cancel: CancellationToken,
) -> Result<u64, LoadError>
where
    S: BulkCopyStore + ?Sized,
{
    let index = chunk.index();
    if cancel.is_cancelled() {
        return Err(LoadError::Cancelled);
    }

    let mut tx = store.begin().await?;

    let copied = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = tx.copy_rows(&target.table, &target.columns, chunk.rows()) => Some(result),
    };

    match copied {
        None => {
            roll_back(tx, index).await;
            Err(LoadError::Cancelled)
        }
        Some(Err(err)) => {
            roll_back(tx, index).await;
            Err(err)
        }
        Some(Ok(_)) if cancel.is_cancelled() => {
            roll_back(tx, index).await;
            Err(LoadError::Cancelled)
        }
        Some(Ok(rows)) => {
            tx.commit().await?;
            debug!(chunk = index, rows, "Chunk committed");
            Ok(rows)
        }
    }
}

async fn roll_back(tx: Box<dyn CopyTransaction>, index: usize) {
    if let Err(e) = tx.rollback().await {
        warn!(chunk = index, error = %e, "Rollback failed");
    }
}
