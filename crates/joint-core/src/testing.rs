//! Scripted in-memory [`ServiceGateway`] for tests.
//!
//! [`ScriptedGateway`] records every invocation and answers from canned
//! responses, so orchestrator behaviour can be asserted without a bus.
//! Available under `cfg(test)` and with the `testing` feature.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use joint_types::{AT_BLACKBOARD, AT_SIMULATION, AT_SOLVER, AT_TEMPORAL_SOLVER, DebugEvent, SessionKey};
use serde_json::Value;

use crate::debug::{DEBUG_METHOD, DEFAULT_DEBUGGER};
use crate::error::RemoteError;
use crate::gateway::ServiceGateway;
use crate::stages::CREATE_PROCESS;

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// Target service.
    pub service: String,
    /// Target method.
    pub method: String,
    /// Arguments passed.
    pub args: Value,
    /// Session the call was made for.
    pub session: SessionKey,
}

type Hook = Arc<dyn Fn(&RecordedCall) + Send + Sync>;
type Route = (String, String);

#[derive(Default)]
struct Script {
    /// Registered services and whether each is configured.
    services: BTreeMap<String, bool>,
    queued: BTreeMap<Route, VecDeque<Value>>,
    fixed: BTreeMap<Route, Value>,
    failures: BTreeMap<Route, String>,
    delays: BTreeMap<Route, Duration>,
    hooks: BTreeMap<Route, Hook>,
    calls: Vec<RecordedCall>,
    processes_created: u64,
}

/// A gateway answering from a script.
#[derive(Default)]
pub struct ScriptedGateway {
    script: Mutex<Script>,
}

fn route(service: &str, method: &str) -> Route {
    (service.to_owned(), method.to_owned())
}

impl ScriptedGateway {
    /// A gateway with no registered services.
    pub fn new() -> Self {
        Self::default()
    }

    /// A gateway with the four default services and the default debugger
    /// registered and configured.
    pub fn with_all_services() -> Self {
        let gateway = Self::new();
        for service in [
            AT_SIMULATION,
            AT_TEMPORAL_SOLVER,
            AT_SOLVER,
            AT_BLACKBOARD,
            DEFAULT_DEBUGGER,
        ] {
            gateway.register(service);
        }
        gateway
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `service` as configured for every session.
    pub fn register(&self, service: &str) {
        let _ = self.lock().services.insert(service.to_owned(), true);
    }

    /// Register `service` without configuring it.
    pub fn register_unconfigured(&self, service: &str) {
        let _ = self.lock().services.insert(service.to_owned(), false);
    }

    /// Drop `service` from the bus.
    pub fn unregister(&self, service: &str) {
        let _ = self.lock().services.remove(service);
    }

    /// Answer every call to `service.method` with `value`.
    pub fn respond(&self, service: &str, method: &str, value: Value) {
        let _ = self.lock().fixed.insert(route(service, method), value);
    }

    /// Answer successive calls with `values`, then fall back to the fixed
    /// response.
    pub fn respond_sequence(&self, service: &str, method: &str, values: Vec<Value>) {
        self.lock()
            .queued
            .entry(route(service, method))
            .or_default()
            .extend(values);
    }

    /// Fail every call to `service.method`.
    pub fn fail(&self, service: &str, method: &str, message: &str) {
        let _ = self
            .lock()
            .failures
            .insert(route(service, method), message.to_owned());
    }

    /// Delay replies of `service.method`.
    pub fn delay(&self, service: &str, method: &str, delay: Duration) {
        let _ = self.lock().delays.insert(route(service, method), delay);
    }

    /// Run `hook` each time `service.method` is invoked, after recording.
    pub fn on_call(
        &self,
        service: &str,
        method: &str,
        hook: impl Fn(&RecordedCall) + Send + Sync + 'static,
    ) {
        let _ = self
            .lock()
            .hooks
            .insert(route(service, method), Arc::new(hook));
    }

    /// All recorded calls in invocation order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Recorded calls to `service.method`.
    pub fn calls_to(&self, service: &str, method: &str) -> Vec<RecordedCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.service == service && c.method == method)
            .cloned()
            .collect()
    }

    /// Debug events delivered to the default debugger.
    pub fn debug_events(&self) -> Vec<DebugEvent> {
        self.calls_to(DEFAULT_DEBUGGER, DEBUG_METHOD)
            .into_iter()
            .filter_map(|c| serde_json::from_value(c.args).ok())
            .collect()
    }

    /// Position of the `nth` (zero-based) call to `service.method`.
    pub fn position_of(&self, service: &str, method: &str, nth: usize) -> Option<usize> {
        self.lock()
            .calls
            .iter()
            .enumerate()
            .filter(|(_, c)| c.service == service && c.method == method)
            .nth(nth)
            .map(|(index, _)| index)
    }
}

impl std::fmt::Debug for ScriptedGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedGateway")
            .field("calls", &self.lock().calls.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ServiceGateway for ScriptedGateway {
    async fn is_registered(&self, service: &str) -> bool {
        self.lock().services.contains_key(service)
    }

    async fn is_configured(&self, service: &str, _session: &SessionKey) -> bool {
        self.lock().services.get(service).copied().unwrap_or(false)
    }

    async fn invoke(
        &self,
        service: &str,
        method: &str,
        args: Value,
        session: &SessionKey,
    ) -> Result<Value, RemoteError> {
        let key = route(service, method);
        let call = RecordedCall {
            service: service.to_owned(),
            method: method.to_owned(),
            args,
            session: session.clone(),
        };

        let (hook, delay) = {
            let mut script = self.lock();
            script.calls.push(call.clone());
            (script.hooks.get(&key).cloned(), script.delays.get(&key).copied())
        };
        if let Some(hook) = hook {
            hook(&call);
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.lock();
        if let Some(message) = script.failures.get(&key) {
            return Err(RemoteError::Remote {
                service: service.to_owned(),
                method: method.to_owned(),
                message: message.clone(),
            });
        }
        if let Some(value) = script.queued.get_mut(&key).and_then(VecDeque::pop_front) {
            return Ok(value);
        }
        if let Some(value) = script.fixed.get(&key) {
            return Ok(value.clone());
        }
        if method == CREATE_PROCESS {
            script.processes_created = script.processes_created.saturating_add(1);
            return Ok(Value::String(format!(
                "{service}-process-{}",
                script.processes_created
            )));
        }
        Ok(Value::Null)
    }
}
