//! Awaitable, single-resolution result handle.
//!
//! A [`Promise`] is the caller's view of an operation whose outcome is
//! decided elsewhere, usually on the dispatch task. It can be awaited from
//! async code, polled without blocking, or waited on from a plain thread.
//! The matching [`Resolver`] settles it at most once.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::error::{ClientError, ClientResult};
use crate::lock;

type Continuation<T> = Box<dyn FnOnce(&ClientResult<T>) + Send>;

struct Slot<T> {
    result: Option<ClientResult<T>>,
    continuations: Vec<Continuation<T>>,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
    notify: Notify,
}

impl<T: Clone> Shared<T> {
    /// Store `result` unless already settled. Continuations run on the
    /// calling thread after the lock is released.
    fn complete(&self, result: ClientResult<T>) -> bool {
        let continuations = {
            let mut slot = lock(&self.slot);
            if slot.result.is_some() {
                return false;
            }
            slot.result = Some(result.clone());
            std::mem::take(&mut slot.continuations)
        };

        self.ready.notify_all();
        self.notify.notify_waiters();
        for continuation in continuations {
            continuation(&result);
        }
        true
    }

    fn peek(&self) -> Option<ClientResult<T>> {
        lock(&self.slot).result.clone()
    }
}

/// Create an unresolved promise and the resolver that settles it.
pub fn pair<T: Clone + Send + 'static>() -> (Resolver<T>, Promise<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot {
            result: None,
            continuations: Vec::new(),
        }),
        ready: Condvar::new(),
        notify: Notify::new(),
    });
    (
        Resolver {
            shared: Arc::clone(&shared),
        },
        Promise { shared },
    )
}

/// Write side of a [`Promise`].
///
/// Dropping an unused resolver settles the promise with
/// [`ClientError::Cancelled`], so no waiter is left hanging.
pub struct Resolver<T: Clone + Send + 'static> {
    shared: Arc<Shared<T>>,
}

impl<T: Clone + Send + 'static> Resolver<T> {
    /// Settle the promise. Returns `false` if it was already settled
    /// (cancelled by the caller, for instance).
    pub fn resolve(self, result: ClientResult<T>) -> bool {
        self.shared.complete(result)
    }

    pub fn is_resolved(&self) -> bool {
        lock(&self.shared.slot).result.is_some()
    }
}

impl<T: Clone + Send + 'static> Drop for Resolver<T> {
    fn drop(&mut self) {
        self.shared.complete(Err(ClientError::Cancelled));
    }
}

/// Read side of an operation's outcome. Cheap to clone; every clone
/// observes the same resolution.
pub struct Promise<T: Clone + Send + 'static> {
    shared: Arc<Shared<T>>,
}

impl<T: Clone + Send + 'static> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Send + 'static> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// An already-settled promise.
    pub fn ready(result: ClientResult<T>) -> Self {
        let (resolver, promise) = pair();
        resolver.resolve(result);
        promise
    }

    /// An already-failed promise.
    pub fn failed(error: ClientError) -> Self {
        Self::ready(Err(error))
    }

    /// Non-blocking poll.
    pub fn try_get(&self) -> Option<ClientResult<T>> {
        self.shared.peek()
    }

    pub fn is_resolved(&self) -> bool {
        lock(&self.shared.slot).result.is_some()
    }

    /// Wait for the resolution.
    pub async fn wait(&self) -> ClientResult<T> {
        loop {
            // Registered before the check so a concurrent `complete` cannot
            // slip between the check and the await.
            let notified = self.shared.notify.notified();
            if let Some(result) = self.shared.peek() {
                return result;
            }
            notified.await;
        }
    }

    /// Wait at most `timeout`. Elapsing returns [`ClientError::Timeout`]
    /// but leaves the promise unresolved.
    pub async fn wait_timeout(&self, timeout: Duration) -> ClientResult<T> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Block the current thread until resolved.
    ///
    /// Must not be called from the task that resolves the promise (the
    /// client's dispatch task or a single-threaded runtime driving it).
    pub fn blocking_wait(&self) -> ClientResult<T> {
        let mut slot = lock(&self.shared.slot);
        loop {
            if let Some(result) = &slot.result {
                return result.clone();
            }
            slot = self
                .shared
                .ready
                .wait(slot)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Block the current thread for at most `timeout`.
    pub fn blocking_wait_timeout(&self, timeout: Duration) -> ClientResult<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = lock(&self.shared.slot);
        loop {
            if let Some(result) = &slot.result {
                return result.clone();
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ClientError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            slot = self
                .shared
                .ready
                .wait_timeout(slot, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// Resolve every waiter with [`ClientError::Cancelled`]. Returns `false`
    /// if the promise had already been settled.
    pub fn cancel(&self) -> bool {
        self.shared.complete(Err(ClientError::Cancelled))
    }

    /// Run `f` once the promise is settled: immediately if it already is,
    /// otherwise on the resolving thread.
    pub fn on_resolve<F>(&self, f: F)
    where
        F: FnOnce(&ClientResult<T>) + Send + 'static,
    {
        let mut slot = lock(&self.shared.slot);
        if let Some(result) = slot.result.clone() {
            drop(slot);
            f(&result);
            return;
        }
        slot.continuations.push(Box::new(f));
    }

    /// Derive a promise whose value is `f` applied to this one's.
    /// Cancelling the derived promise cancels this one too.
    pub fn map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> ClientResult<U> + Send + 'static,
    {
        let (resolver, mapped) = pair();
        self.on_resolve(move |result| {
            resolver.resolve(result.clone().and_then(f));
        });
        let source = Arc::downgrade(&self.shared);
        mapped.on_resolve(move |result| {
            if let (Err(ClientError::Cancelled), Some(source)) = (result, source.upgrade()) {
                source.complete(Err(ClientError::Cancelled));
            }
        });
        mapped
    }
}

impl<T: Clone + Send + 'static> IntoFuture for Promise<T> {
    type Output = ClientResult<T>;
    type IntoFuture = Pin<Box<dyn Future<Output = ClientResult<T>> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}
