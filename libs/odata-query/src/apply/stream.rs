//! Asynchronous application over a record stream.
//!
//! Parsing, binding and plan compilation stay synchronous; only draining the
//! stream is awaited, and that is where cancellation and the timeout apply.

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use odata_edm::Record;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Pipeline, QueryResult};
use crate::error::{Error, ExecutionError};

/// Drain `stream`, then run `pipeline` over the collected rows.
///
/// # Errors
/// Returns [`ExecutionError::Cancelled`] when `cancel` fires first,
/// [`ExecutionError::TimedOut`] when `timeout` elapses first, or the first
/// error the stream or evaluation produces.
pub async fn apply_to_stream<S>(
    stream: S,
    pipeline: &Pipeline,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
) -> Result<QueryResult, Error>
where
    S: Stream<Item = Result<Record, ExecutionError>>,
{
    let drain = async {
        let mut stream = std::pin::pin!(stream);
        let mut rows = Vec::new();
        while let Some(item) = stream.next().await {
            rows.push(Arc::new(item?));
        }
        Ok::<_, ExecutionError>(rows)
    };
    let bounded = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, drain)
                .await
                .map_err(|_| ExecutionError::TimedOut(limit))?,
            None => drain.await,
        }
    };

    let rows = tokio::select! {
        biased;

        () = cancel.cancelled() => {
            debug!("stream query cancelled");
            return Err(ExecutionError::Cancelled.into());
        }
        rows = bounded => rows?,
    };
    pipeline.run(Box::new(rows.into_iter().map(Ok::<_, ExecutionError>)))
}
