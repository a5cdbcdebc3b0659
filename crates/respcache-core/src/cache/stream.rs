//! Streaming cache writes
//!
//! Body chunks are buffered in memory; closing the sink stores the response
//! through the regular `set` path. A failing `set` is the sink's close error.

use bytes::Bytes;
use futures::Sink;
use futures::future::{BoxFuture, FutureExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, warn};

use super::store::CacheStore;
use crate::error::CacheError;
use crate::key::CacheKey;
use crate::value::{Body, CacheValue};

enum State {
    Open { value: CacheValue, chunks: Vec<Bytes> },
    Finishing(BoxFuture<'static, Result<(), CacheError>>),
    Closed,
}

/// Sink returned by [`CacheStore::create_write_stream`]
pub struct CacheWriteStream {
    store: CacheStore,
    key: CacheKey,
    size: u64,
    state: State,
}

impl CacheWriteStream {
    pub(crate) fn new(store: CacheStore, key: CacheKey, value: CacheValue) -> Self {
        Self {
            store,
            key,
            size: 0,
            state: State::Open {
                value,
                chunks: Vec::new(),
            },
        }
    }

    /// Bytes buffered so far
    pub fn buffered(&self) -> u64 {
        self.size
    }
}

impl Sink<Bytes> for CacheWriteStream {
    type Error = CacheError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        match self.state {
            State::Open { .. } => Poll::Ready(Ok(())),
            _ => Poll::Ready(Err(CacheError::StreamClosed)),
        }
    }

    fn start_send(self: Pin<&mut Self>, chunk: Bytes) -> Result<(), Self::Error> {
        let this = self.get_mut();
        let State::Open { chunks, .. } = &mut this.state else {
            return Err(CacheError::StreamClosed);
        };

        let size = this.size + chunk.len() as u64;
        let limit = this.store.config().max_entry_size;
        if size > limit {
            warn!(
                "Discarding streamed body for {} {}: {} bytes exceeds {}",
                this.key.method,
                this.key.url(),
                size,
                limit
            );
            this.state = State::Closed;
            return Err(CacheError::EntryTooLarge { size, limit });
        }

        chunks.push(chunk);
        this.size = size;
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let this = self.get_mut();
        loop {
            match std::mem::replace(&mut this.state, State::Closed) {
                State::Open { value, chunks } => {
                    debug!(
                        "Finishing streamed write of {} bytes for {} {}",
                        this.size,
                        this.key.method,
                        this.key.url()
                    );

                    let store = this.store.clone();
                    let key = this.key.clone();
                    let value = CacheValue {
                        body: Some(Body::Chunks(chunks)),
                        ..value
                    };
                    this.state =
                        State::Finishing(async move { store.set(&key, value).await }.boxed());
                }
                State::Finishing(mut finish) => {
                    return match finish.as_mut().poll(cx) {
                        Poll::Ready(result) => Poll::Ready(result),
                        Poll::Pending => {
                            this.state = State::Finishing(finish);
                            Poll::Pending
                        }
                    };
                }
                State::Closed => return Poll::Ready(Ok(())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::StoreConfig;
    use futures::SinkExt;
    use respcache_db::{Database, DatabaseConfig};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn store(config: StoreConfig) -> (TempDir, CacheStore) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("cache.db").display());
        let db = Database::connect(&DatabaseConfig::new(url)).await.unwrap();
        let store = CacheStore::with_clock(db, config, Arc::new(ManualClock::new(1500)));
        (dir, store)
    }

    fn key() -> CacheKey {
        CacheKey::new("https://a", "GET", "/stream")
    }

    #[tokio::test]
    async fn test_stream_stores_concatenated_body() {
        let (_dir, store) = store(StoreConfig::default()).await;
        let mut sink = store
            .create_write_stream(key(), CacheValue::new(200, "OK", 1000, 2000, 3000))
            .unwrap();

        sink.send(Bytes::from_static(b"hel")).await.unwrap();
        sink.send(Bytes::from_static(b"lo ")).await.unwrap();
        sink.send(Bytes::from_static(b"world")).await.unwrap();
        assert_eq!(sink.buffered(), 11);
        sink.close().await.unwrap();

        let cached = store.get(&key()).await.unwrap().unwrap();
        assert_eq!(cached.body, Some(Bytes::from_static(b"hello world")));
    }

    #[tokio::test]
    async fn test_stream_rejects_writes_after_close() {
        let (_dir, store) = store(StoreConfig::default()).await;
        let mut sink = store
            .create_write_stream(key(), CacheValue::new(200, "OK", 1000, 2000, 3000))
            .unwrap();
        sink.close().await.unwrap();

        assert!(matches!(
            sink.send(Bytes::from_static(b"late")).await,
            Err(CacheError::StreamClosed)
        ));
        // Closing again is harmless
        sink.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_over_limit_is_discarded() {
        let (_dir, store) = store(StoreConfig {
            max_entry_size: 4,
            ..StoreConfig::default()
        })
        .await;
        let mut sink = store
            .create_write_stream(key(), CacheValue::new(200, "OK", 1000, 2000, 3000))
            .unwrap();

        sink.send(Bytes::from_static(b"abc")).await.unwrap();
        assert!(matches!(
            sink.send(Bytes::from_static(b"de")).await,
            Err(CacheError::EntryTooLarge { size: 5, limit: 4 })
        ));
        sink.close().await.unwrap();
        assert!(store.get(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stream_surfaces_finalize_failure() {
        let (_dir, store) = store(StoreConfig::default()).await;
        let mut sink = store
            .create_write_stream(key(), CacheValue::new(200, "OK", 1000, 2000, 3000))
            .unwrap();
        sink.send(Bytes::from_static(b"body")).await.unwrap();

        store.close().await;
        assert!(matches!(sink.close().await, Err(CacheError::Database(_))));
    }

    #[tokio::test]
    async fn test_create_stream_validates_eagerly() {
        let (_dir, store) = store(StoreConfig::default()).await;

        let bad_key = CacheKey::new("https://a", "GET", "");
        assert!(matches!(
            store.create_write_stream(bad_key, CacheValue::new(200, "OK", 0, 0, 0)),
            Err(CacheError::InvalidKey(_))
        ));
    }
}
