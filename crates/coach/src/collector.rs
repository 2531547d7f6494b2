//! Drains a streamed completion into the full reply text.

use crate::error::CoachError;
use dentcoach_core::provider::ChunkReceiver;
use tracing::trace;

/// Concatenate content deltas until a `done` chunk or the channel closes.
///
/// An error chunk aborts the drain. Parse the result only after this
/// returns: partial JSON is never handed to the contract parser.
pub async fn collect_stream(mut rx: ChunkReceiver) -> Result<String, CoachError> {
    let mut text = String::new();
    let mut chunks = 0usize;

    while let Some(chunk) = rx.recv().await {
        let chunk = chunk?;
        chunks += 1;
        if let Some(delta) = &chunk.content {
            text.push_str(delta);
        }
        if chunk.done {
            break;
        }
    }

    trace!(chunks, len = text.len(), "Drained completion stream");
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dentcoach_core::error::ProviderError;
    use dentcoach_core::provider::StreamChunk;

    fn delta(text: &str) -> Result<StreamChunk, ProviderError> {
        Ok(StreamChunk {
            content: Some(text.into()),
            ..StreamChunk::default()
        })
    }

    #[tokio::test]
    async fn concatenates_until_done() {
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        tx.send(delta("{\"respon")).await.unwrap();
        tx.send(delta("se\": \"Hi\"}")).await.unwrap();
        tx.send(Ok(StreamChunk {
            done: true,
            ..StreamChunk::default()
        }))
        .await
        .unwrap();
        // Anything after done is ignored
        tx.send(delta("trailing")).await.unwrap();

        assert_eq!(collect_stream(rx).await.unwrap(), "{\"response\": \"Hi\"}");
    }

    #[tokio::test]
    async fn channel_close_ends_stream() {
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        tx.send(delta("partial")).await.unwrap();
        drop(tx);
        assert_eq!(collect_stream(rx).await.unwrap(), "partial");
    }

    #[tokio::test]
    async fn error_chunk_is_completion_service_error() {
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        tx.send(delta("half")).await.unwrap();
        tx.send(Err(ProviderError::StreamInterrupted("reset".into())))
            .await
            .unwrap();
        let err = collect_stream(rx).await.unwrap_err();
        assert!(matches!(
            err,
            CoachError::CompletionService(ProviderError::StreamInterrupted(_))
        ));
    }
}
