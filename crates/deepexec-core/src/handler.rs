//! Operation handlers.
//!
//! Handlers and rollback handlers share one contract: take the operation's
//! arguments, return a JSON value or a [`HandlerError`].
//!
//! `OperationHandler` uses RPITIT for its async method, which is not object
//! safe. `OperationHandlerDyn` is the boxed-future twin, blanket-implemented
//! for every `OperationHandler`, and `BoxHandler` wraps an
//! `Arc<dyn OperationHandlerDyn>` so handlers can be stored and cloned.
//!
//! Plain closures are adapted with [`BoxHandler::from_fn`] (synchronous) and
//! [`BoxHandler::from_async`] (returns a future). The choice is made once,
//! at construction time.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use deepexec_types::operation::Args;
use serde_json::Value;

// ---------------------------------------------------------------------------
// HandlerError
// ---------------------------------------------------------------------------

/// Error returned by a handler invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// The handler ran and reported a failure.
    #[error("{0}")]
    Failed(String),

    /// The handler cannot be invoked at all.
    #[error("handler unavailable: {0}")]
    Unavailable(String),
}

impl HandlerError {
    pub fn failed(message: impl fmt::Display) -> Self {
        HandlerError::Failed(message.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        HandlerError::Failed(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        HandlerError::Failed(message.to_string())
    }
}

pub type HandlerResult = Result<Value, HandlerError>;

// ---------------------------------------------------------------------------
// OperationHandler trait
// ---------------------------------------------------------------------------

/// A unit of work the engine can invoke.
pub trait OperationHandler: Send + Sync {
    fn invoke(&self, args: Args) -> impl Future<Output = HandlerResult> + Send;

    /// Whether the handler can currently be invoked. Checked by the
    /// `handler_callable` built-in validation.
    fn available(&self) -> bool {
        true
    }
}

/// Object-safe version of [`OperationHandler`] with a boxed future.
pub trait OperationHandlerDyn: Send + Sync {
    fn invoke_boxed(&self, args: Args) -> Pin<Box<dyn Future<Output = HandlerResult> + Send + '_>>;

    fn available(&self) -> bool;
}

impl<T: OperationHandler> OperationHandlerDyn for T {
    fn invoke_boxed(&self, args: Args) -> Pin<Box<dyn Future<Output = HandlerResult> + Send + '_>> {
        Box::pin(self.invoke(args))
    }

    fn available(&self) -> bool {
        OperationHandler::available(self)
    }
}

// ---------------------------------------------------------------------------
// Closure adapters
// ---------------------------------------------------------------------------

/// Adapter for synchronous closures.
pub struct FnHandler<F>(F);

impl<F> OperationHandler for FnHandler<F>
where
    F: Fn(Args) -> HandlerResult + Send + Sync,
{
    fn invoke(&self, args: Args) -> impl Future<Output = HandlerResult> + Send {
        std::future::ready((self.0)(args))
    }
}

/// Adapter for closures returning a future.
pub struct AsyncFnHandler<F>(F);

impl<F, Fut> OperationHandler for AsyncFnHandler<F>
where
    F: Fn(Args) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    fn invoke(&self, args: Args) -> impl Future<Output = HandlerResult> + Send {
        (self.0)(args)
    }
}

// ---------------------------------------------------------------------------
// BoxHandler
// ---------------------------------------------------------------------------

/// Type-erased, cheaply cloneable handler.
#[derive(Clone)]
pub struct BoxHandler {
    inner: Arc<dyn OperationHandlerDyn>,
}

impl BoxHandler {
    /// Wrap a concrete `OperationHandler`.
    pub fn new<T: OperationHandler + 'static>(handler: T) -> Self {
        Self {
            inner: Arc::new(handler),
        }
    }

    /// Wrap a synchronous closure.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(Args) -> HandlerResult + Send + Sync + 'static,
    {
        Self::new(FnHandler(f))
    }

    /// Wrap a closure that returns a future.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::new(AsyncFnHandler(f))
    }

    pub async fn invoke(&self, args: Args) -> HandlerResult {
        self.inner.invoke_boxed(args).await
    }

    pub fn available(&self) -> bool {
        self.inner.available()
    }
}

impl fmt::Debug for BoxHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxHandler")
            .field("available", &self.available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Offline;

    impl OperationHandler for Offline {
        async fn invoke(&self, _args: Args) -> HandlerResult {
            Err(HandlerError::Unavailable("offline".into()))
        }

        fn available(&self) -> bool {
            false
        }
    }

    fn args(pairs: &[(&str, Value)]) -> Args {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn sync_closure_receives_args() {
        let handler = BoxHandler::from_fn(|args| {
            let n = args.get("n").and_then(Value::as_i64).unwrap_or(0);
            Ok(json!(n * 2))
        });
        let out = handler.invoke(args(&[("n", json!(21))])).await.unwrap();
        assert_eq!(out, json!(42));
        assert!(handler.available());
    }

    #[tokio::test]
    async fn async_closure_error_propagates() {
        let handler = BoxHandler::from_async(|_args| async {
            tokio::task::yield_now().await;
            Err(HandlerError::failed("disk full"))
        });
        let err = handler.invoke(Args::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "disk full");
    }

    #[tokio::test]
    async fn custom_handler_reports_unavailable() {
        let handler = BoxHandler::new(Offline);
        assert!(!handler.available());
        let err = handler.invoke(Args::new()).await.unwrap_err();
        assert!(matches!(err, HandlerError::Unavailable(_)));
    }

    #[test]
    fn clone_shares_inner() {
        let handler = BoxHandler::from_fn(|_| Ok(Value::Null));
        let cloned = handler.clone();
        assert!(Arc::ptr_eq(&handler.inner, &cloned.inner));
    }
}
