use crate::server::{HandlerResult, RequestContext, RequestError};
use async_trait::async_trait;

/// Hooks invoked on request-cached instances around an action.
///
/// After the controller of a request is resolved, `on_request_start` runs on
/// every instance cached for the request whose definition declared lifecycle
/// hooks. `on_request_end` runs on them after the action returns, before its
/// result is written to the response.
#[async_trait]
pub trait RequestLifecycle: Send + Sync {
    /// Invoked before parameters are bound.
    async fn on_request_start(&self, _context: &RequestContext) -> HandlerResult<()> {
        Ok(())
    }

    /// Invoked before the result is written.
    async fn on_request_end(&self, _context: &RequestContext) -> HandlerResult<()> {
        Ok(())
    }
}

/// Handles errors raised while handling requests before they are turned into
/// responses.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    /// Returns `true` if the error was handled and no further response should
    /// be written.
    async fn handle(&self, error: &RequestError, context: &RequestContext) -> bool;
}
