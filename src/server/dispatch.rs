//! Handler dispatch shared by the transport loops

use crate::server::shutdown::TaskGuard;
use crate::server::{RequestContext, RequestHandler, ResponseWriter, ServeContext, ShutdownListener};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;
use tracing::trace;

/// Spawns one tracked task per query
///
/// Every clone holds a [`TaskGuard`], so a loop or connection owning a
/// dispatcher is itself tracked until it returns.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    handler: Arc<dyn RequestHandler>,
    shutdown: ShutdownListener,
    query_timeout: Option<Duration>,
    guard: TaskGuard,
}

impl Dispatcher {
    pub(crate) fn new(
        handler: Arc<dyn RequestHandler>,
        shutdown: ShutdownListener,
        query_timeout: Option<Duration>,
        guard: TaskGuard,
    ) -> Self {
        Self {
            handler,
            shutdown,
            query_timeout,
            guard,
        }
    }

    pub(crate) fn shutdown(&self) -> &ShutdownListener {
        &self.shutdown
    }

    /// Run the handler for `ctx` in its own task
    ///
    /// The deadline is measured from the moment the query arrived.
    pub(crate) fn dispatch(&self, ctx: RequestContext, writer: Box<dyn ResponseWriter>) {
        self.spawn(ctx, writer, None);
    }

    /// Like [`dispatch`](Self::dispatch), holding `permit` until the handler
    /// returns
    pub(crate) fn dispatch_with_permit(
        &self,
        ctx: RequestContext,
        writer: Box<dyn ResponseWriter>,
        permit: OwnedSemaphorePermit,
    ) {
        self.spawn(ctx, writer, Some(permit));
    }

    fn spawn(
        &self,
        ctx: RequestContext,
        writer: Box<dyn ResponseWriter>,
        permit: Option<OwnedSemaphorePermit>,
    ) {
        let deadline = self.query_timeout.map(|t| ctx.received_at + t);
        let cx = ServeContext::new(self.shutdown.clone(), deadline);
        let handler = Arc::clone(&self.handler);
        let guard = self.guard.clone();

        trace!(
            peer = %ctx.client_addr(),
            protocol = %ctx.protocol,
            id = ctx.message.id(),
            "Dispatching query"
        );

        tokio::spawn(async move {
            let _guard = guard;
            let _permit = permit;
            handler.handle(cx, ctx, writer).await;
        });
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("query_timeout", &self.query_timeout)
            .finish_non_exhaustive()
    }
}
