//! Module handler trait

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::event::Event;

/// Code a module runs for each event delivered to it
///
/// Errors and panics are contained by the bus: they mark the module unhealthy
/// and show up as an error status in the aggregated response.
#[async_trait]
pub trait ModuleHandler: Send + Sync {
    async fn handle(&self, event: Arc<Event>) -> eyre::Result<Value>;
}

/// Handler backed by an async closure
pub struct FnHandler<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> ModuleHandler for FnHandler<F, Fut>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync,
    Fut: Future<Output = eyre::Result<Value>> + Send + 'static,
{
    async fn handle(&self, event: Arc<Event>) -> eyre::Result<Value> {
        (self.f)(event).await
    }
}

/// Wrap an async closure as a shareable handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ModuleHandler>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = eyre::Result<Value>> + Send + 'static,
{
    Arc::new(FnHandler {
        f,
        _marker: PhantomData,
    })
}
