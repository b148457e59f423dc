//! Values that are either known now or produced later by a single async call.

use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use crate::error::{AuthError, Result};

/// A shared, clonable future whose error is reference counted.
pub type DeferredValue<T> = Shared<BoxFuture<'static, std::result::Result<T, Arc<AuthError>>>>;

/// Start a shared deferred computation. It does not run until first awaited.
pub fn deferred_value<T, F>(future: F) -> DeferredValue<T>
where
    T: Clone + Send + Sync + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    future.map(|r| r.map_err(Arc::new)).boxed().shared()
}

/// A value available immediately or resolved later.
///
/// Every clone of a deferred supplier observes the same single underlying
/// computation.
#[derive(Clone)]
pub enum Supplier<T: Clone> {
    Immediate(T),
    Deferred(DeferredValue<T>),
}

impl<T> Supplier<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Wrap a future. It does not run until the first `resolve()`.
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Supplier::Deferred(deferred_value(future))
    }

    /// Derive a deferred value from another deferred value.
    pub fn map_deferred<S, F>(source: DeferredValue<S>, f: F) -> Self
    where
        S: Clone + Send + Sync + 'static,
        F: FnOnce(S) -> T + Send + 'static,
    {
        Supplier::Deferred(source.map(|r| r.map(f)).boxed().shared())
    }

    /// Obtain the value, awaiting the deferred computation if needed.
    pub async fn resolve(&self) -> Result<T> {
        match self {
            Supplier::Immediate(value) => Ok(value.clone()),
            Supplier::Deferred(future) => future.clone().await.map_err(shared_error),
        }
    }

    /// The value if it is already available.
    pub fn now(&self) -> Option<T> {
        match self {
            Supplier::Immediate(value) => Some(value.clone()),
            Supplier::Deferred(future) => future.peek().and_then(|r| r.as_ref().ok().cloned()),
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Supplier::Deferred(_))
    }
}

impl<T: Clone> From<T> for Supplier<T> {
    fn from(value: T) -> Self {
        Supplier::Immediate(value)
    }
}

impl<T: Clone + fmt::Debug> fmt::Debug for Supplier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Supplier::Immediate(value) => f.debug_tuple("Immediate").field(value).finish(),
            Supplier::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Rebuild an owned error from one shared between several waiters.
fn shared_error(err: Arc<AuthError>) -> AuthError {
    match err.as_ref() {
        AuthError::Config(msg) => AuthError::Config(msg.clone()),
        AuthError::ApiStatus { status, body } => AuthError::ApiStatus {
            status: *status,
            body: body.clone(),
        },
        AuthError::Timeout { timeout_ms } => AuthError::Timeout {
            timeout_ms: *timeout_ms,
        },
        AuthError::InvalidResponse { status, body } => AuthError::InvalidResponse {
            status: *status,
            body: body.clone(),
        },
        AuthError::Cancelled => AuthError::Cancelled,
        AuthError::Network(msg) => AuthError::Network(msg.clone()),
        AuthError::Refresh(msg) => AuthError::Refresh(msg.clone()),
        other => AuthError::Refresh(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_immediate() {
        let s = Supplier::from("eu".to_string());
        assert_eq!(s.resolve().await.unwrap(), "eu");
        assert_eq!(s.now().as_deref(), Some("eu"));
        assert!(!s.is_deferred());
    }

    #[tokio::test]
    async fn test_deferred_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let s: Supplier<u32> = Supplier::deferred(async move {
            Ok(counter.fetch_add(1, Ordering::SeqCst) + 10)
        });
        let copy = s.clone();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(s.now().is_none());
        assert_eq!(s.resolve().await.unwrap(), 10);
        assert_eq!(copy.resolve().await.unwrap(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(s.now(), Some(10));
    }

    #[tokio::test]
    async fn test_map_deferred_shares_source() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let shared = deferred_value(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(("eu".to_string(), "acme".to_string()))
        });

        let env = Supplier::map_deferred(shared.clone(), |(env, _)| env);
        let tenant = Supplier::map_deferred(shared, |(_, tenant)| tenant);

        assert_eq!(env.resolve().await.unwrap(), "eu");
        assert_eq!(tenant.resolve().await.unwrap(), "acme");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deferred_error_is_shared() {
        let s: Supplier<String> =
            Supplier::deferred(async { Err(AuthError::Config("bad token".into())) });
        let err = s.resolve().await.unwrap_err();
        assert!(matches!(err, AuthError::Config(ref m) if m == "bad token"));
        assert!(s.clone().resolve().await.is_err());
    }
}
