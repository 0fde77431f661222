//! Subscriptions bound to one consumer's lifetime.
//!
//! [`SubscriptionRegistry`] starts operations and streams on the background
//! runtime and keeps a cancellation handle for each of them. Results are not
//! handed to callbacks on the runtime; they are queued and run by whoever owns
//! the matching [`DeliveryQueue`] (the consumer context, e.g. the UI thread),
//! and only while their subscription is still live.

use crate::error::MaybeCancelled;
use crate::operation::Operation;
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SubscriptionId(u64);

/// Opaque handle for one in-flight operation or stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    id: SubscriptionId,
}

type Delivery<C> = Box<dyn FnOnce(&mut C) + Send>;

struct Envelope<C> {
    id: SubscriptionId,
    /// Terminal envelopes retire their subscription when processed.
    terminal: bool,
    /// `None` marks the end of a stream: retire without calling anything.
    deliver: Option<Delivery<C>>,
}

#[derive(Default)]
struct LiveSet {
    next_id: u64,
    live: HashMap<SubscriptionId, CancellationToken>,
    /// Thread currently running a callback, if any.
    delivering: Option<ThreadId>,
}

#[derive(Default)]
struct Shared {
    set: Mutex<LiveSet>,
    /// Held from the liveness check until the callback returns. `cancel_all`
    /// takes it too, so it cannot return while a callback is running elsewhere.
    gate: Mutex<()>,
}

type SharedLiveSet = Arc<Shared>;

fn lock(shared: &Shared) -> MutexGuard<'_, LiveSet> {
    shared.set.lock().unwrap_or_else(PoisonError::into_inner)
}

fn release(shared: &Shared, id: SubscriptionId) {
    lock(shared).live.remove(&id);
}

fn drain(shared: &Shared) -> Vec<CancellationToken> {
    {
        let mut set = lock(shared);
        // Called from inside a callback: the delivery in progress is our own.
        if set.delivering == Some(thread::current().id()) {
            return set.live.drain().map(|(_, token)| token).collect();
        }
    }
    let _gate = shared.gate.lock().unwrap_or_else(PoisonError::into_inner);
    let drained = lock(shared).live.drain().map(|(_, token)| token).collect();
    drained
}

pub struct SubscriptionRegistry<C> {
    live: SharedLiveSet,
    tx: UnboundedSender<Envelope<C>>,
    runtime: Handle,
}

/// Consumer side of a registry. Runs queued callbacks against the consumer
/// state `C`, one at a time.
pub struct DeliveryQueue<C> {
    live: SharedLiveSet,
    rx: UnboundedReceiver<Envelope<C>>,
}

impl<C: 'static> SubscriptionRegistry<C> {
    /// Create a registry spawning onto the current tokio runtime.
    ///
    /// Panics when called outside a runtime; use [`Self::with_runtime`] there.
    pub fn new() -> (Self, DeliveryQueue<C>) {
        Self::with_runtime(Handle::current())
    }

    pub fn with_runtime(runtime: Handle) -> (Self, DeliveryQueue<C>) {
        let live = SharedLiveSet::default();
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                live: live.clone(),
                tx,
                runtime,
            },
            DeliveryQueue { live, rx },
        )
    }

    fn register(&self, token: CancellationToken) -> SubscriptionId {
        let mut set = lock(&self.live);
        let id = SubscriptionId(set.next_id);
        set.next_id += 1;
        set.live.insert(id, token);
        id
    }

    /// Start `operation` and deliver its single result to `on_result` or
    /// `on_error` on the consumer context. The subscription is registered
    /// before the operation can possibly complete.
    pub fn add<T, E, R, F>(&self, operation: Operation<T, E>, on_result: R, on_error: F) -> Subscription
    where
        T: Send + 'static,
        E: MaybeCancelled + Send + 'static,
        R: FnOnce(&mut C, T) + Send + 'static,
        F: FnOnce(&mut C, E) + Send + 'static,
    {
        let (token, future) = operation.into_parts();
        let id = self.register(token.clone());
        let live = self.live.clone();
        let tx = self.tx.clone();

        self.runtime.spawn(async move {
            // Dropping `future` on cancellation aborts whatever I/O it owns.
            let res = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    trace!(?id, "operation cancelled before completion");
                    release(&live, id);
                    return;
                }
                res = future => res,
            };
            let deliver: Delivery<C> = match res {
                Ok(value) => Box::new(move |ctx: &mut C| on_result(ctx, value)),
                Err(e) if e.is_cancelled() => {
                    release(&live, id);
                    return;
                }
                Err(e) => Box::new(move |ctx: &mut C| on_error(ctx, e)),
            };
            let envelope = Envelope {
                id,
                terminal: true,
                deliver: Some(deliver),
            };
            if tx.send(envelope).is_err() {
                // Consumer gone.
                release(&live, id);
            }
        });

        Subscription { id }
    }

    /// Observe `stream`, delivering every item to `on_next` in order. An error
    /// item is terminal; the end of the stream retires the subscription
    /// silently.
    pub fn add_stream<T, E, S, N, F>(&self, stream: S, on_next: N, on_error: F) -> Subscription
    where
        T: Send + 'static,
        E: MaybeCancelled + Send + 'static,
        S: Stream<Item = Result<T, E>> + Send + 'static,
        N: FnMut(&mut C, T) + Send + 'static,
        F: FnOnce(&mut C, E) + Send + 'static,
    {
        let token = CancellationToken::new();
        let id = self.register(token.clone());
        let live = self.live.clone();
        let tx = self.tx.clone();
        let on_next = Arc::new(Mutex::new(on_next));
        let mut on_error = Some(on_error);

        self.runtime.spawn(async move {
            let mut stream = Box::pin(stream);
            loop {
                let item = tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        trace!(?id, "stream cancelled");
                        release(&live, id);
                        return;
                    }
                    item = stream.next() => item,
                };
                let envelope = match item {
                    Some(Ok(value)) => {
                        let on_next = on_next.clone();
                        Envelope {
                            id,
                            terminal: false,
                            deliver: Some(Box::new(move |ctx: &mut C| {
                                let mut f = on_next.lock().unwrap_or_else(PoisonError::into_inner);
                                (*f)(ctx, value)
                            }) as Delivery<C>),
                        }
                    }
                    Some(Err(e)) if e.is_cancelled() => Envelope {
                        id,
                        terminal: true,
                        deliver: None,
                    },
                    Some(Err(e)) => {
                        // Terminal: the loop returns right after sending, so this runs at most once.
                        let on_error = on_error.take().expect("on_error used after terminal item");
                        Envelope {
                            id,
                            terminal: true,
                            deliver: Some(Box::new(move |ctx: &mut C| on_error(ctx, e)) as Delivery<C>),
                        }
                    }
                    None => Envelope {
                        id,
                        terminal: true,
                        deliver: None,
                    },
                };
                let terminal = envelope.terminal;
                if tx.send(envelope).is_err() {
                    release(&live, id);
                    return;
                }
                if terminal {
                    return;
                }
            }
        });

        Subscription { id }
    }

    /// Cancel every live subscription. Idempotent. Once this returns, no
    /// callback of a cancelled subscription is running or will run, whichever
    /// thread it is called from.
    pub fn cancel_all(&self) {
        let drained = drain(&self.live);
        if drained.is_empty() {
            return;
        }
        debug!(count = drained.len(), "cancelling subscriptions");
        for token in drained {
            token.cancel();
        }
    }

    /// Cancel a single subscription. Returns false when it was no longer live.
    pub fn cancel(&self, subscription: &Subscription) -> bool {
        match lock(&self.live).live.remove(&subscription.id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of subscriptions still live.
    pub fn live_count(&self) -> usize {
        lock(&self.live).live.len()
    }
}

impl<C> Drop for SubscriptionRegistry<C> {
    fn drop(&mut self) {
        for token in drain(&self.live) {
            token.cancel();
        }
    }
}

impl<C> DeliveryQueue<C> {
    /// Run every queued delivery without blocking. Returns how many callbacks ran.
    pub fn try_deliver(&mut self, ctx: &mut C) -> usize {
        let mut ran = 0;
        while let Ok(envelope) = self.rx.try_recv() {
            if self.dispatch(envelope, ctx) {
                ran += 1;
            }
        }
        ran
    }

    /// Wait for the next live delivery and run it. Returns false once every
    /// producer (registry and its tasks) is gone.
    pub async fn deliver_next(&mut self, ctx: &mut C) -> bool {
        while let Some(envelope) = self.rx.recv().await {
            if self.dispatch(envelope, ctx) {
                return true;
            }
        }
        false
    }

    fn dispatch(&self, envelope: Envelope<C>, ctx: &mut C) -> bool {
        let Some(deliver) = envelope.deliver else {
            release(&self.live, envelope.id);
            return false;
        };

        let _gate = self.live.gate.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let mut set = lock(&self.live);
            let live = if envelope.terminal {
                set.live.remove(&envelope.id).is_some()
            } else {
                set.live.contains_key(&envelope.id)
            };
            if !live {
                trace!(id = ?envelope.id, "dropping delivery for inactive subscription");
                return false;
            }
            set.delivering = Some(thread::current().id());
        }

        deliver(ctx);
        lock(&self.live).delivering = None;
        true
    }
}
