//! Per-session state and the store that holds it.
//!
//! A [`Session`] bundles everything the joint keeps for one
//! [`SessionKey`]: the component set, the simulation source file, the bound
//! simulation process, the stop flag and the busy flag. Keeping them in one
//! record under one key means they cannot diverge.
//!
//! # Architecture
//!
//! Flags are atomics so `stop` can be served while a run is in flight
//! without taking any lock. The process binding is behind a
//! [`tokio::sync::RwLock`] because `reset` replaces it while other
//! operations may be reading it.
//!
//! Entries are created by `configure` and only removed by an explicit
//! `teardown`; the store does not evict on its own.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use joint_types::{ComponentSet, ProcessId, SessionKey};
use tokio::sync::RwLock;

/// State of one configured session.
#[derive(Debug)]
pub struct Session {
    key: SessionKey,
    components: ComponentSet,
    simulation_file: String,
    process: RwLock<Option<ProcessId>>,
    stop_requested: AtomicBool,
    running: AtomicBool,
}

impl Session {
    /// Create a session record.
    pub fn new(
        key: SessionKey,
        components: ComponentSet,
        simulation_file: String,
        process: Option<ProcessId>,
    ) -> Self {
        Self {
            key,
            components,
            simulation_file,
            process: RwLock::new(process),
            stop_requested: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    /// The session key.
    pub const fn key(&self) -> &SessionKey {
        &self.key
    }

    /// The component set bound at configuration time.
    pub const fn components(&self) -> &ComponentSet {
        &self.components
    }

    /// Source file the simulation process is created from.
    pub fn simulation_file(&self) -> &str {
        &self.simulation_file
    }

    /// The currently bound simulation process, if any.
    pub async fn process_id(&self) -> Option<ProcessId> {
        self.process.read().await.clone()
    }

    /// Bind a new simulation process, returning the previous one.
    pub async fn bind_process(&self, process: Option<ProcessId>) -> Option<ProcessId> {
        let mut guard = self.process.write().await;
        std::mem::replace(&mut *guard, process)
    }

    // -----------------------------------------------------------------------
    // Stop
    // -----------------------------------------------------------------------

    /// Request that the running tact loop ends before its next iteration.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    /// Whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Clear a pending stop request.
    pub fn clear_stop(&self) {
        self.stop_requested.store(false, Ordering::Release);
    }

    // -----------------------------------------------------------------------
    // Busy flag
    // -----------------------------------------------------------------------

    /// Whether a tact run currently holds this session.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Mark the session as running.
    ///
    /// Returns `None` if another run already holds it. The flag is released
    /// when the returned guard is dropped.
    pub fn try_begin_run(self: &Arc<Self>) -> Option<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard {
                session: Arc::clone(self),
            })
    }
}

/// Holds a session's busy flag for the lifetime of one run.
#[derive(Debug)]
pub struct RunGuard {
    session: Arc<Session>,
}

impl RunGuard {
    /// The session this guard holds.
    pub const fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.session.running.store(false, Ordering::Release);
    }
}

/// Storage for session records keyed by [`SessionKey`].
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Look up a session.
    async fn get(&self, key: &SessionKey) -> Option<Arc<Session>>;

    /// Store `session` only if the entry under its key is still `expected`
    /// (`None` meaning absent). Returns whether the store was updated.
    async fn replace(&self, expected: Option<&Arc<Session>>, session: Arc<Session>) -> bool;

    /// Remove the entry under `key` only if it is still `expected`.
    /// Returns whether it was removed.
    async fn remove_if(&self, key: &SessionKey, expected: &Arc<Session>) -> bool;

    /// Number of stored sessions.
    async fn len(&self) -> usize;
}

/// In-process [`SessionStore`] backed by a map behind a read-write lock.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<BTreeMap<SessionKey, Arc<Session>>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &SessionKey) -> Option<Arc<Session>> {
        self.sessions.read().await.get(key).cloned()
    }

    async fn replace(&self, expected: Option<&Arc<Session>>, session: Arc<Session>) -> bool {
        let mut sessions = self.sessions.write().await;
        let current = sessions.get(session.key());
        let unchanged = match (current, expected) {
            (None, None) => true,
            (Some(current), Some(expected)) => Arc::ptr_eq(current, expected),
            _ => false,
        };
        if unchanged {
            let _ = sessions.insert(session.key().clone(), session);
        }
        unchanged
    }

    async fn remove_if(&self, key: &SessionKey, expected: &Arc<Session>) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.get(key).is_some_and(|current| Arc::ptr_eq(current, expected)) {
            let _ = sessions.remove(key);
            true
        } else {
            false
        }
    }

    async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
