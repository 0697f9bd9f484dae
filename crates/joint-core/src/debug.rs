//! Best-effort debug side channel.
//!
//! [`DebugEmitter::emit`] never waits on the bus. Each session gets its own
//! unbounded queue, drained in order by a task of its own that forwards
//! every event to the debugger service's `debug` method when that service
//! is registered. A slow or hung debugger only delays that session's later
//! events, never the tact loop or another session. Delivery failures are
//! logged and dropped.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use joint_types::{DebugEvent, SessionKey};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::gateway::ServiceGateway;

/// Default service name of the debugger.
pub const DEFAULT_DEBUGGER: &str = "ATJointDebugger";
/// Debugger method receiving events.
pub const DEBUG_METHOD: &str = "debug";
/// Initiator used for events produced by the joint itself.
pub const JOINT_INITIATOR: &str = "at_joint";

enum Command {
    Emit(DebugEvent),
    Flush(oneshot::Sender<()>),
}

struct Shared {
    gateway: Arc<dyn ServiceGateway>,
    debugger: String,
    queues: Mutex<BTreeMap<SessionKey, mpsc::UnboundedSender<Command>>>,
}

/// Handle for publishing debug events. Cheap to clone; clones share the
/// per-session queues.
#[derive(Clone)]
pub struct DebugEmitter {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for DebugEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugEmitter")
            .field("debugger", &self.shared.debugger)
            .finish_non_exhaustive()
    }
}

impl DebugEmitter {
    /// Create an emitter delivering to `debugger`.
    ///
    /// Delivery tasks are spawned lazily on the first event of each
    /// session, so `emit` must be called from within a tokio runtime.
    pub fn new(gateway: Arc<dyn ServiceGateway>, debugger: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                gateway,
                debugger: debugger.into(),
                queues: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Queue an event for the session's observers.
    pub fn emit(&self, initiator: &str, data: Value, session: &SessionKey) {
        let event = DebugEvent {
            initiator: initiator.to_owned(),
            data,
        };
        let mut queues = self
            .shared
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let tx = queues
            .entry(session.clone())
            .or_insert_with(|| self.spawn_queue(session));
        if let Err(mpsc::error::SendError(command)) = tx.send(Command::Emit(event)) {
            // The drain task is gone; start a fresh one for this session.
            let tx = self.spawn_queue(session);
            if tx.send(command).is_err() {
                debug!(initiator, session = %session, "debug channel closed, event dropped");
            }
            let _ = queues.insert(session.clone(), tx);
        }
    }

    /// Wait until every event queued for `session` before this call has
    /// been handled. Returns at once for a session with nothing queued.
    pub async fn flush(&self, session: &SessionKey) {
        let tx = self
            .shared
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session)
            .cloned();
        let Some(tx) = tx else {
            return;
        };
        let (done_tx, done_rx) = oneshot::channel();
        if tx.send(Command::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Drop the session's queue. Events already queued are still delivered.
    pub fn close(&self, session: &SessionKey) {
        let _ = self
            .shared
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session);
    }

    fn spawn_queue(&self, session: &SessionKey) -> mpsc::UnboundedSender<Command> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(drain(
            rx,
            Arc::clone(&self.shared.gateway),
            self.shared.debugger.clone(),
            session.clone(),
        ));
        tx
    }
}

async fn drain(
    mut rx: mpsc::UnboundedReceiver<Command>,
    gateway: Arc<dyn ServiceGateway>,
    debugger: String,
    session: SessionKey,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Emit(event) => {
                deliver(gateway.as_ref(), &debugger, &event, &session).await;
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!(session = %session, "debug delivery task finished");
}

async fn deliver(
    gateway: &dyn ServiceGateway,
    debugger: &str,
    event: &DebugEvent,
    session: &SessionKey,
) {
    if !gateway.is_registered(debugger).await {
        return;
    }
    let args = match serde_json::to_value(event) {
        Ok(args) => args,
        Err(e) => {
            warn!(initiator = event.initiator, error = %e, "failed to serialize debug event");
            return;
        }
    };
    if let Err(e) = gateway.invoke(debugger, DEBUG_METHOD, args, session).await {
        warn!(
            debugger,
            initiator = event.initiator,
            session = %session,
            error = %e,
            "failed to deliver debug event"
        );
    }
}
