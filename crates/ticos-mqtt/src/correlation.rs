//! Request/response correlation.
//!
//! Every response-expecting publish registers a pending entry keyed by a
//! request id; the platform echoes the id back (in the response topic for
//! devices, in the payload for gateways) and the entry is resolved and
//! removed. Entries also leave the table on timeout or when the client
//! disconnects.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use serde_json::Value;
use tokio::task::AbortHandle;

use crate::error::{ClientError, ClientResult};
use crate::lock;
use crate::promise::{self, Promise, Resolver};

/// Correlation id of an outgoing request. Allocated monotonically from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct PendingRequest {
    resolver: Resolver<Value>,
    timer: Option<AbortHandle>,
}

struct TableState {
    next_id: u64,
    open: bool,
    pending: HashMap<RequestId, PendingRequest>,
}

/// Pending requests of one client.
pub struct RequestTable {
    state: Mutex<TableState>,
}

impl RequestTable {
    /// A table that accepts registrations.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TableState {
                next_id: 1,
                open: true,
                pending: HashMap::new(),
            }),
        }
    }

    /// A table that rejects registrations until [`reopen`](Self::reopen).
    pub fn closed() -> Self {
        let table = Self::new();
        lock(&table.state).open = false;
        table
    }

    /// Allocate an id and register a pending entry for it.
    pub fn register(&self) -> ClientResult<(RequestId, Promise<Value>)> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(ClientError::NotConnected);
        }
        let id = RequestId(state.next_id);
        state.next_id += 1;

        let (resolver, promise) = promise::pair();
        state.pending.insert(
            id,
            PendingRequest {
                resolver,
                timer: None,
            },
        );
        Ok((id, promise))
    }

    /// Attach the timeout timer of `id`. If the request already settled the
    /// timer is aborted straight away.
    pub fn arm(&self, id: RequestId, timer: AbortHandle) {
        let mut state = lock(&self.state);
        match state.pending.get_mut(&id) {
            Some(entry) => entry.timer = Some(timer),
            None => timer.abort(),
        }
    }

    /// Resolve and remove `id`. Returns `false` for unknown (already
    /// settled, expired or never issued) ids.
    pub fn resolve(&self, id: RequestId, result: ClientResult<Value>) -> bool {
        let Some(entry) = lock(&self.state).pending.remove(&id) else {
            return false;
        };
        if let Some(timer) = entry.timer {
            timer.abort();
        }
        entry.resolver.resolve(result)
    }

    /// Fail `id` with a timeout. Called from the request's own timer, which
    /// therefore is not aborted.
    pub fn expire(&self, id: RequestId, timeout_ms: u64) -> bool {
        let Some(entry) = lock(&self.state).pending.remove(&id) else {
            return false;
        };
        entry
            .resolver
            .resolve(Err(ClientError::Timeout { timeout_ms }))
    }

    /// Drop `id` without resolving it, aborting its timer. Used once the
    /// caller has settled the promise itself.
    pub fn discard(&self, id: RequestId) -> bool {
        let Some(entry) = lock(&self.state).pending.remove(&id) else {
            return false;
        };
        if let Some(timer) = entry.timer {
            timer.abort();
        }
        true
    }

    /// Resolve every pending entry with `error` and reject new
    /// registrations. Returns how many entries were failed.
    pub fn close(&self, error: ClientError) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut state = lock(&self.state);
            state.open = false;
            state.pending.drain().map(|(_, entry)| entry).collect()
        };
        let count = drained.len();
        for entry in drained {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
            entry.resolver.resolve(Err(error.clone()));
        }
        count
    }

    /// Accept registrations again. Ids keep increasing across reopen.
    pub fn reopen(&self) {
        lock(&self.state).open = true;
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    pub fn contains(&self, id: RequestId) -> bool {
        lock(&self.state).pending.contains_key(&id)
    }

    /// Number of unresolved requests.
    pub fn len(&self) -> usize {
        lock(&self.state).pending.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.state).pending.is_empty()
    }
}

impl Default for RequestTable {
    fn default() -> Self {
        Self::new()
    }
}
