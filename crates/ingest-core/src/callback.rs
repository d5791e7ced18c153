use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use gt7_model::Snapshot;

pub type SyncFn = dyn Fn(&Snapshot) -> anyhow::Result<()> + Send + Sync;
pub type AsyncFn = dyn Fn(Arc<Snapshot>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// A telemetry subscriber.
///
/// `Sync` callbacks run on the dispatcher's worker threads, `Async` ones on
/// the tokio runtime the dispatcher was created with.
#[derive(Clone)]
pub enum Callback {
    Sync(Arc<SyncFn>),
    Async(Arc<AsyncFn>),
}

impl Callback {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&Snapshot) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Callback::Sync(Arc::new(f))
    }

    pub fn asynchronous<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<Snapshot>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Callback::Async(Arc::new(move |snapshot| f(snapshot).boxed()))
    }

    /// Sync callback with bound context, passed by reference on every call.
    pub fn sync_with<C, F>(ctx: C, f: F) -> Self
    where
        C: Send + Sync + 'static,
        F: Fn(&Snapshot, &C) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Callback::Sync(Arc::new(move |snapshot| f(snapshot, &ctx)))
    }

    /// Async callback with bound context; each invocation gets its own `Arc`.
    pub fn async_with<C, F, Fut>(ctx: Arc<C>, f: F) -> Self
    where
        C: Send + Sync + 'static,
        F: Fn(Arc<Snapshot>, Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Callback::Async(Arc::new(move |snapshot| {
            f(snapshot, Arc::clone(&ctx)).boxed()
        }))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, Callback::Async(_))
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callback::Sync(_) => f.write_str("Callback::Sync(..)"),
            Callback::Async(_) => f.write_str("Callback::Async(..)"),
        }
    }
}
