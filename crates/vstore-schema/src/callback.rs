use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::early::EarlyContext;

/// Error type user callbacks fail with.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What a callback produced when it was invoked.
pub enum CallbackOutcome {
    /// The callback ran to completion synchronously.
    Done(Result<(), BoxError>),
    /// The callback started work that finishes later. Callbacks after it in
    /// the same version wait for this future.
    Pending(BoxFuture<'static, Result<(), BoxError>>),
}

impl fmt::Debug for CallbackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackOutcome::Done(result) => f.debug_tuple("Done").field(result).finish(),
            CallbackOutcome::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// A post-upgrade callback, run against the open connection after a
/// version's structural changes have committed.
pub struct Callback<C> {
    f: Arc<dyn Fn(&C) -> CallbackOutcome + Send + Sync>,
}

impl<C: 'static> Callback<C> {
    /// Wrap a callback that finishes before returning.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&C) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self {
            f: Arc::new(move |conn: &C| CallbackOutcome::Done(f(conn))),
        }
    }

    /// Wrap a callback that returns a future. The future gets its own
    /// clone of the connection.
    pub fn pending<F, Fut>(f: F) -> Self
    where
        C: Clone,
        F: Fn(C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self {
            f: Arc::new(move |conn: &C| CallbackOutcome::Pending(Box::pin(f(conn.clone())))),
        }
    }

    /// Wrap a callback that decides per call whether it finishes now.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&C) -> CallbackOutcome + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }
}

impl<C> Callback<C> {
    pub fn invoke(&self, conn: &C) -> CallbackOutcome {
        (self.f)(conn)
    }
}

impl<C> Clone for Callback<C> {
    fn clone(&self) -> Self {
        Self {
            f: Arc::clone(&self.f),
        }
    }
}

impl<C> fmt::Debug for Callback<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback(..)")
    }
}

/// A callback run inside the version-change transaction, before the
/// version's structural changes. Failing it aborts the transaction.
#[derive(Clone)]
pub struct EarlyCallback {
    f: Arc<dyn Fn(&mut EarlyContext<'_>) -> Result<(), BoxError> + Send + Sync>,
}

impl EarlyCallback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut EarlyContext<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    pub fn invoke(&self, cx: &mut EarlyContext<'_>) -> Result<(), BoxError> {
        (self.f)(cx)
    }
}

impl fmt::Debug for EarlyCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EarlyCallback(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn sync_callbacks_finish_on_invoke() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let cb: Callback<u32> = Callback::sync(move |conn| {
            seen.fetch_add(*conn as usize, Ordering::SeqCst);
            Ok(())
        });
        assert!(matches!(cb.invoke(&3), CallbackOutcome::Done(Ok(()))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn pending_callbacks_own_a_connection_clone() {
        let cb: Callback<String> = Callback::pending(|conn: String| async move {
            let result: Result<(), BoxError> = if conn.is_empty() {
                Err("empty connection".into())
            } else {
                Ok(())
            };
            result
        });
        let CallbackOutcome::Pending(ok) = cb.invoke(&"db".to_string()) else {
            panic!("expected a pending outcome");
        };
        assert!(futures::executor::block_on(ok).is_ok());

        let CallbackOutcome::Pending(failing) = cb.clone().invoke(&String::new()) else {
            panic!("expected a pending outcome");
        };
        let err = futures::executor::block_on(failing).unwrap_err();
        assert_eq!(err.to_string(), "empty connection");
    }
}
