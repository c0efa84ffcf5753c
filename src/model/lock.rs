//! Observable state with at most one locking action in flight

use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::sync::watch;

use crate::error::{Error, Result};

/// Flags published alongside the state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Conditions {
    /// A locking action has been pending longer than the grace period
    pub locked: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<S> {
    pub state: S,
    pub conditions: Conditions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Idle,
    /// Waiting on the named action
    Pending(&'static str),
}

struct Inner<S> {
    state: S,
    lock: LockState,
    conditions: Conditions,
    ticket: u64,
}

/// State owned by one concern, published to subscribers on every change
pub struct Model<S> {
    inner: Arc<Mutex<Inner<S>>>,
    updates: Arc<watch::Sender<Snapshot<S>>>,
    lock_grace: Duration,
}

impl<S> Clone for Model<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            updates: Arc::clone(&self.updates),
            lock_grace: self.lock_grace,
        }
    }
}

impl<S> Model<S>
where
    S: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(initial: S, lock_grace: Duration) -> Self {
        let (updates, _) = watch::channel(Snapshot {
            state: initial.clone(),
            conditions: Conditions::default(),
        });
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: initial,
                lock: LockState::Idle,
                conditions: Conditions::default(),
                ticket: 0,
            })),
            updates: Arc::new(updates),
            lock_grace,
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner<S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot<S>> {
        self.updates.subscribe()
    }

    pub fn state(&self) -> S {
        self.lock_inner().state.clone()
    }

    pub fn conditions(&self) -> Conditions {
        self.lock_inner().conditions
    }

    pub fn snapshot(&self) -> Snapshot<S> {
        let inner = self.lock_inner();
        Snapshot {
            state: inner.state.clone(),
            conditions: inner.conditions,
        }
    }

    pub fn lock_state(&self) -> LockState {
        self.lock_inner().lock
    }

    fn publish(&self, inner: &Inner<S>) {
        let snapshot = Snapshot {
            state: inner.state.clone(),
            conditions: inner.conditions,
        };
        self.updates.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }

    /// Replace the state with `f(state)`; allowed while an action is pending
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&S) -> S,
    {
        let mut inner = self.lock_inner();
        let next = f(&inner.state);
        inner.state = next;
        self.publish(&inner);
    }

    /// Claim the lock for `kind`, failing if another action holds it
    ///
    /// Must be called within a Tokio runtime: the `locked` condition is raised
    /// by a timer if the action is still pending after the grace period.
    pub fn begin(&self, kind: &'static str) -> Result<PendingAction<S>> {
        let mut inner = self.lock_inner();
        if let LockState::Pending(in_flight) = inner.lock {
            tracing::error!("{} not possible while waiting for {}", kind, in_flight);
            return Err(Error::Locked {
                requested: kind.to_string(),
                in_flight: in_flight.to_string(),
            });
        }
        inner.ticket += 1;
        inner.lock = LockState::Pending(kind);
        let ticket = inner.ticket;
        drop(inner);

        let model = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(model.lock_grace).await;
            model.assert_locked(ticket);
        });

        Ok(PendingAction {
            model: self.clone(),
            ticket,
            settled: false,
        })
    }

    fn assert_locked(&self, ticket: u64) {
        let mut inner = self.lock_inner();
        if inner.ticket == ticket && matches!(inner.lock, LockState::Pending(_)) {
            inner.conditions.locked = true;
            self.publish(&inner);
        }
    }

    fn settle<F>(&self, ticket: u64, apply: Option<F>)
    where
        F: FnOnce(&S) -> S,
    {
        let mut inner = self.lock_inner();
        if inner.ticket != ticket {
            return;
        }
        if let Some(apply) = apply {
            let next = apply(&inner.state);
            inner.state = next;
        }
        inner.lock = LockState::Idle;
        inner.conditions.locked = false;
        self.publish(&inner);
    }

    /// Run `work` as a locking action and fold its result into the state
    ///
    /// Failures leave the state as it was. Either way the lock is released.
    /// The action runs as its own task and holds the lock until `work`
    /// finishes, even if the caller stops waiting for it.
    pub async fn run_locking<Fut, T, A>(&self, kind: &'static str, work: Fut, apply: A) -> Result<T>
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
        A: FnOnce(&S, &T) -> S + Send + 'static,
    {
        let pending = self.begin(kind)?;
        let action = tokio::spawn(async move {
            let result = work.await;
            match &result {
                Ok(value) => pending.complete(|state| apply(state, value)),
                Err(e) => {
                    tracing::warn!("{} failed: {}", kind, e);
                    drop(pending);
                }
            }
            result
        });
        action.await.map_err(|e| Error::Output {
            operation: format!("run {}", kind),
            message: e.to_string(),
        })?
    }
}

/// The lock held by an unsettled action; dropping it releases the lock
pub struct PendingAction<S>
where
    S: Clone + PartialEq + Send + Sync + 'static,
{
    model: Model<S>,
    ticket: u64,
    settled: bool,
}

impl<S> PendingAction<S>
where
    S: Clone + PartialEq + Send + Sync + 'static,
{
    /// Release the lock, replacing the state with `apply(state)`
    pub fn complete<F>(mut self, apply: F)
    where
        F: FnOnce(&S) -> S,
    {
        self.settled = true;
        self.model.settle(self.ticket, Some(apply));
    }
}

impl<S> Drop for PendingAction<S>
where
    S: Clone + PartialEq + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if !self.settled {
            self.model.settle::<fn(&S) -> S>(self.ticket, None);
        }
    }
}
