//! Cancellable asynchronous operations.
//!
//! An [`Operation`] pairs a boxed future with the [`CancellationToken`] that
//! stops it. Nothing runs until the operation is awaited or handed to a
//! [`SubscriptionRegistry`](crate::registry::SubscriptionRegistry).

use crate::error::{DispatchError, MaybeCancelled};
use futures::future::{BoxFuture, FutureExt};
use std::future::{Future, IntoFuture};
use tokio_util::sync::CancellationToken;

pub struct Operation<T, E = DispatchError> {
    token: CancellationToken,
    future: BoxFuture<'static, Result<T, E>>,
}

impl<T, E> Operation<T, E>
where
    T: Send + 'static,
    E: MaybeCancelled + Send + 'static,
{
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            token: CancellationToken::new(),
            future: future.boxed(),
        }
    }

    /// Build an operation whose body can observe its own cancellation token,
    /// so it can abort in-flight work cooperatively.
    pub fn with_token<F, Fut>(build: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let token = CancellationToken::new();
        let future = build(token.clone()).boxed();
        Self { token, future }
    }

    #[cfg(test)]
    pub fn cancel_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub(crate) fn into_parts(self) -> (CancellationToken, BoxFuture<'static, Result<T, E>>) {
        (self.token, self.future)
    }
}

impl<T, E> IntoFuture for Operation<T, E>
where
    T: Send + 'static,
    E: MaybeCancelled + Send + 'static,
{
    type Output = Result<T, E>;
    type IntoFuture = BoxFuture<'static, Result<T, E>>;

    fn into_future(self) -> Self::IntoFuture {
        let (token, future) = self.into_parts();
        async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(E::cancelled()),
                res = future => res,
            }
        }
        .boxed()
    }
}
