//! Lazily-constructed, memoized backend clients.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::OnceCell;

use crate::error::SinkError;

type Connector<T> = Box<dyn Fn() -> BoxFuture<'static, Result<Arc<T>, SinkError>> + Send + Sync>;

/// Holds at most one live client for a sink.
///
/// The client is built on first use. Concurrent first callers wait for the
/// same construction; a failed construction leaves the cache empty so the
/// next call tries again. The client is never dropped while the sink lives.
pub struct ClientCache<T: ?Sized> {
    name: String,
    cell: OnceCell<Arc<T>>,
    connect: Connector<T>,
}

impl<T: ?Sized + Send + Sync + 'static> ClientCache<T> {
    /// Create an empty cache that builds its client with `connect`.
    pub fn new<F, Fut>(name: impl Into<String>, connect: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<T>, SinkError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            cell: OnceCell::new(),
            connect: Box::new(move || connect().boxed()),
        }
    }

    /// Create a cache around an already-built client.
    pub fn ready(name: impl Into<String>, client: Arc<T>) -> Self {
        let name = name.into();
        let message = format!("{name}: client already initialized");
        Self {
            name,
            cell: OnceCell::from(client),
            connect: Box::new(move || {
                let message = message.clone();
                async move { Err(SinkError::config(message)) }.boxed()
            }),
        }
    }

    /// Return the cached client, building it first if needed.
    pub async fn get(&self) -> Result<Arc<T>, SinkError> {
        let client = self
            .cell
            .get_or_try_init(|| async {
                log::info!("Connecting {} client", self.name);
                let client = (self.connect)().await;
                if let Err(e) = &client {
                    log::error!("Failed to connect {} client: {}", self.name, e);
                }
                client
            })
            .await?;
        Ok(Arc::clone(client))
    }

    pub fn is_connected(&self) -> bool {
        self.cell.initialized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeClient {
        serial: usize,
    }

    fn counting_cache(counter: Arc<AtomicUsize>) -> ClientCache<FakeClient> {
        ClientCache::new("fake", move || {
            let counter = Arc::clone(&counter);
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                let serial = counter.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(FakeClient { serial }))
            }
        })
    }

    #[tokio::test]
    async fn test_client_is_built_once_and_reused() {
        let counter = Arc::new(AtomicUsize::new(0));
        let cache = counting_cache(Arc::clone(&counter));
        assert!(!cache.is_connected());

        let first = cache.get().await.unwrap();
        let second = cache.get().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(cache.is_connected());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_use_builds_one_client() {
        let counter = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(counting_cache(Arc::clone(&counter)));

        let a = tokio::spawn({
            let cache = Arc::clone(&cache);
            async move { cache.get().await.unwrap() }
        });
        let b = tokio::spawn({
            let cache = Arc::clone(&cache);
            async move { cache.get().await.unwrap() }
        });

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.serial, 0);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_construction_is_not_cached() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let cache: ClientCache<FakeClient> = ClientCache::new("flaky", {
            let attempts = Arc::clone(&attempts);
            move || {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(SinkError::config("missing endpoint"))
                    } else {
                        Ok(Arc::new(FakeClient { serial: attempt }))
                    }
                }
            }
        });

        let err = cache.get().await.err().unwrap();
        assert!(err.is_configuration());
        assert!(!cache.is_connected());

        let client = cache.get().await.unwrap();
        assert_eq!(client.serial, 1);
    }

    #[tokio::test]
    async fn test_ready_cache_returns_given_client() {
        let client = Arc::new(FakeClient { serial: 7 });
        let cache = ClientCache::ready("given", Arc::clone(&client));

        assert!(cache.is_connected());
        assert!(Arc::ptr_eq(&cache.get().await.unwrap(), &client));
    }
}
