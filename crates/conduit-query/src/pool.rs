//! Lazily created, explicitly closed pool slot owned by one reader.

use crate::error::{DataError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

/// Lifecycle of a reader's pool
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ReaderState {
    /// No pool yet
    Uninitialized,
    /// Pool exists and is reused for every operation
    Pooled,
    /// Pool released; terminal
    Closed,
}

impl fmt::Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReaderState::Uninitialized => write!(f, "uninitialized"),
            ReaderState::Pooled => write!(f, "pooled"),
            ReaderState::Closed => write!(f, "closed"),
        }
    }
}

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one created pool.
///
/// Returned by `connect`; two calls that reuse the same pool report the same id.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct PoolId(u64);

impl PoolId {
    fn next() -> Self {
        PoolId(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool-{}", self.0)
    }
}

enum Slot<P> {
    Uninitialized,
    Pooled(P, PoolId),
    Closed,
}

/// Guarded Uninitialized -> Pooled -> Closed transitions around a pool handle.
///
/// `P` is a cheap handle to a shared pool (an `Arc` or a driver pool that is
/// internally reference counted). Creation runs under the slot lock, so
/// concurrent first calls create exactly one pool.
pub struct PoolSlot<P> {
    label: String,
    slot: Mutex<Slot<P>>,
}

impl<P: Clone + Send> PoolSlot<P> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            slot: Mutex::new(Slot::Uninitialized),
        }
    }

    pub async fn state(&self) -> ReaderState {
        match &*self.slot.lock().await {
            Slot::Uninitialized => ReaderState::Uninitialized,
            Slot::Pooled(..) => ReaderState::Pooled,
            Slot::Closed => ReaderState::Closed,
        }
    }

    /// Fail with `ClosedReader` once the slot is closed
    pub async fn ensure_open(&self) -> Result<()> {
        match &*self.slot.lock().await {
            Slot::Closed => Err(self.closed_error()),
            _ => Ok(()),
        }
    }

    /// Return the existing pool, or create it with `init` if there is none yet
    pub async fn get_or_init<F, Fut>(&self, init: F) -> Result<P>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<P>>,
    {
        self.get_or_init_with_id(init).await.map(|(pool, _)| pool)
    }

    /// Like `get_or_init`, also reporting the identity of the pool handed out
    pub async fn get_or_init_with_id<F, Fut>(&self, init: F) -> Result<(P, PoolId)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<P>>,
    {
        let mut slot = self.slot.lock().await;
        match &*slot {
            Slot::Pooled(pool, id) => {
                debug!("Reusing existing pool {} for {}", id, self.label);
                Ok((pool.clone(), *id))
            }
            Slot::Closed => Err(self.closed_error()),
            Slot::Uninitialized => {
                let pool = init().await?;
                let id = PoolId::next();
                debug!("Created pool {} for {}", id, self.label);
                *slot = Slot::Pooled(pool.clone(), id);
                Ok((pool, id))
            }
        }
    }

    /// Transition to Closed, handing back the pool (if any) for release.
    ///
    /// Closing an already closed or never-connected slot returns `None`.
    pub async fn close(&self) -> Option<P> {
        let mut slot = self.slot.lock().await;
        match std::mem::replace(&mut *slot, Slot::Closed) {
            Slot::Pooled(pool, _) => Some(pool),
            Slot::Uninitialized | Slot::Closed => None,
        }
    }

    fn closed_error(&self) -> DataError {
        DataError::ClosedReader(self.label.clone())
    }
}
