use super::api::PluginApi;
use super::context::PluginContext;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// An automation routine driven by the plugin coordinator
///
/// Returning `Ok` marks the execution completed; an error marks it failed
/// with the error chain captured.
#[async_trait]
pub trait PluginRoutine: Send + Sync + 'static {
    async fn run(&self, ctx: PluginContext, api: PluginApi) -> anyhow::Result<()>;
}

struct FnRoutine<F>(F);

#[async_trait]
impl<F, Fut> PluginRoutine for FnRoutine<F>
where
    F: Fn(PluginContext, PluginApi) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn run(&self, ctx: PluginContext, api: PluginApi) -> anyhow::Result<()> {
        (self.0)(ctx, api).await
    }
}

/// Wrap an async closure as a routine
pub fn routine_fn<F, Fut>(f: F) -> Arc<dyn PluginRoutine>
where
    F: Fn(PluginContext, PluginApi) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnRoutine(f))
}
