//! The joint: caller-facing operations over sessions.
//!
//! [`Joint`] resolves every token through [`SessionKey::resolve`], looks the
//! session up in the injected [`SessionStore`], and drives the remote
//! components through the injected [`ServiceGateway`]. It is cheap to clone;
//! clones share the same store, gateway and debug channel.

use std::sync::Arc;

use joint_types::{
    ComponentRoles, ComponentSet, ComponentStatus, ProcessId, Role, SessionKey, TactResult,
};
use serde_json::json;
use tracing::{error, info, warn};

use crate::debug::{DebugEmitter, JOINT_INITIATOR};
use crate::error::{JointError, RemoteError};
use crate::gateway::{self, ServiceGateway};
use crate::session::{MemorySessionStore, RunGuard, Session, SessionStore};
use crate::stages::{CREATE_PROCESS, KILL_PROCESS};
use crate::tact::{self, TactPlan};

/// The tact orchestration component.
#[derive(Clone)]
pub struct Joint {
    gateway: Arc<dyn ServiceGateway>,
    sessions: Arc<dyn SessionStore>,
    debug_events: DebugEmitter,
}

impl std::fmt::Debug for Joint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Joint")
            .field("debug_events", &self.debug_events)
            .finish_non_exhaustive()
    }
}

impl Joint {
    /// Create a joint over the given gateway and session store.
    ///
    /// Operations must run within a tokio runtime; debug delivery tasks are
    /// spawned on demand.
    pub fn new(
        gateway: Arc<dyn ServiceGateway>,
        sessions: Arc<dyn SessionStore>,
        debugger: impl Into<String>,
    ) -> Self {
        let debug_events = DebugEmitter::new(Arc::clone(&gateway), debugger);
        Self {
            gateway,
            sessions,
            debug_events,
        }
    }

    /// Create a joint with an in-memory session store.
    pub fn with_memory_store(gateway: Arc<dyn ServiceGateway>, debugger: impl Into<String>) -> Self {
        Self::new(gateway, Arc::new(MemorySessionStore::new()), debugger)
    }

    /// The debug event channel shared by all runs.
    pub const fn debug_events(&self) -> &DebugEmitter {
        &self.debug_events
    }

    // -----------------------------------------------------------------------
    // Component set registry
    // -----------------------------------------------------------------------

    /// Bind a component set and a fresh simulation process to the session.
    ///
    /// Replaces any previous configuration of the session; the process bound
    /// to the replaced configuration is killed on a best-effort basis.
    pub async fn configure(
        &self,
        roles: &ComponentRoles,
        token: Option<&str>,
    ) -> Result<bool, JointError> {
        let key = SessionKey::resolve(token);
        let Some(file) = roles
            .at_simulation_file
            .as_deref()
            .filter(|file| !file.is_empty())
        else {
            return Err(JointError::MissingFile { key });
        };

        // Holding the existing session's busy flag keeps a run from starting
        // on it while it is being replaced.
        let existing = self.sessions.get(&key).await;
        let _held = match &existing {
            Some(session) => Some(
                session
                    .try_begin_run()
                    .ok_or_else(|| JointError::Busy { key: key.clone() })?,
            ),
            None => None,
        };

        let components = ComponentSet::from_roles(roles);
        let process = self.create_process(&components, file, &key).await?;
        if process.is_none() {
            warn!(
                session = %key,
                simulation = components.at_simulation,
                "simulation unavailable at configure time, no process bound"
            );
        }

        let process_id = process.as_ref().map(|p| p.as_str().to_owned());
        let session = Arc::new(Session::new(
            key.clone(),
            components,
            file.to_owned(),
            process,
        ));
        if !self
            .sessions
            .replace(existing.as_ref(), Arc::clone(&session))
            .await
        {
            // Another configure won the race; give back what was created.
            self.release_process(&session).await;
            return Err(JointError::Busy { key });
        }
        if let Some(replaced) = &existing {
            self.release_process(replaced).await;
        }

        let components = session.components();
        info!(
            session = %key,
            simulation = components.at_simulation,
            temporal_solver = components.at_temporal_solver,
            solver = components.at_solver,
            blackboard = components.at_blackboard,
            simulation_file = file,
            process_id = process_id.as_deref(),
            "session configured"
        );
        Ok(true)
    }

    /// Whether a component set exists for the session.
    pub async fn is_configured(&self, token: Option<&str>) -> bool {
        self.sessions.get(&SessionKey::resolve(token)).await.is_some()
    }

    /// The component set bound to the session.
    pub async fn get_config(&self, token: Option<&str>) -> Result<ComponentSet, JointError> {
        Ok(self.session(token).await?.components().clone())
    }

    /// The session record for a token.
    pub async fn session(&self, token: Option<&str>) -> Result<Arc<Session>, JointError> {
        let key = SessionKey::resolve(token);
        self.sessions
            .get(&key)
            .await
            .ok_or(JointError::NotConfigured { key })
    }

    /// Registered/configured state of every role's service.
    pub async fn component_state(
        &self,
        token: Option<&str>,
    ) -> Result<Vec<ComponentStatus>, JointError> {
        let session = self.session(token).await?;
        let mut states = Vec::with_capacity(Role::ALL.len());
        for role in Role::ALL {
            let name = session.components().service(role);
            let registered = self.gateway.is_registered(name).await;
            let configured = registered && self.gateway.is_configured(name, session.key()).await;
            states.push(ComponentStatus {
                role,
                name: name.to_owned(),
                registered,
                configured,
            });
        }
        Ok(states)
    }

    /// Forget the session, killing its simulation process on a best-effort
    /// basis. Returns whether a session existed.
    pub async fn teardown(&self, token: Option<&str>) -> Result<bool, JointError> {
        let key = SessionKey::resolve(token);
        let Some(existing) = self.sessions.get(&key).await else {
            return Ok(false);
        };
        let _held = existing
            .try_begin_run()
            .ok_or_else(|| JointError::Busy { key: key.clone() })?;
        if !self.sessions.remove_if(&key, &existing).await {
            return Err(JointError::Busy { key });
        }
        self.release_process(&existing).await;
        self.debug_events.close(&key);
        info!(session = %key, "session torn down");
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Tact orchestration
    // -----------------------------------------------------------------------

    /// Run `iterate` tacts and return their results in tact order.
    pub async fn process_tact(
        &self,
        iterate: u64,
        wait_ms: u64,
        token: Option<&str>,
    ) -> Result<Vec<TactResult>, JointError> {
        let guard = self.begin_run(iterate, token).await?;
        tact::run_tacts(
            Arc::clone(&self.gateway),
            self.debug_events.clone(),
            guard,
            TactPlan { iterate, wait_ms },
        )
        .await
    }

    /// Start a tact run in the background and return immediately.
    ///
    /// Validation and the busy check happen before this returns; the results
    /// are only observable through debug events. A failed run publishes an
    /// `at_joint` event carrying the error message.
    pub async fn process_tact_background(
        &self,
        iterate: u64,
        wait_ms: u64,
        token: Option<&str>,
    ) -> Result<bool, JointError> {
        let guard = self.begin_run(iterate, token).await?;
        let gateway = Arc::clone(&self.gateway);
        let debug_events = self.debug_events.clone();
        let key = guard.session().key().clone();
        tokio::spawn(async move {
            let plan = TactPlan { iterate, wait_ms };
            if let Err(e) = tact::run_tacts(gateway, debug_events.clone(), guard, plan).await {
                error!(session = %key, error = %e, "background tact run failed");
                debug_events.emit(
                    JOINT_INITIATOR,
                    json!({"error": e.to_string(), "kind": e.kind()}),
                    &key,
                );
            }
        });
        Ok(true)
    }

    /// Ask the session's running tact loop to stop before its next tact.
    ///
    /// A no-op for unknown sessions. The flag is cleared again when the next
    /// run starts.
    pub async fn stop(&self, token: Option<&str>) {
        let key = SessionKey::resolve(token);
        match self.sessions.get(&key).await {
            Some(session) => {
                session.request_stop();
                info!(session = %key, running = session.is_running(), "stop requested");
            }
            None => warn!(session = %key, "stop requested for unconfigured session"),
        }
    }

    /// Recreate the session's simulation process from its remembered file.
    ///
    /// Solver state is left untouched.
    pub async fn reset(&self, token: Option<&str>) -> Result<bool, JointError> {
        let session = self.session(token).await?;
        let service = &session.components().at_simulation;
        let key = session.key();

        if let Some(old) = session.process_id().await {
            let _ = self
                .gateway
                .invoke(service, KILL_PROCESS, json!({"process_id": old.as_str()}), key)
                .await?;
        }
        let created = self
            .gateway
            .invoke(
                service,
                CREATE_PROCESS,
                json!({"file": session.simulation_file()}),
                key,
            )
            .await?;
        let process = ProcessId::from_value(&created);
        if process.is_none() {
            warn!(session = %key, simulation = service, "create_process returned no id, no process bound");
        }
        let previous = session.bind_process(process.clone()).await;

        info!(
            session = %key,
            previous = previous.as_ref().map(ProcessId::as_str),
            process_id = process.as_ref().map(ProcessId::as_str),
            "simulation process reset"
        );
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn begin_run(&self, iterate: u64, token: Option<&str>) -> Result<RunGuard, JointError> {
        let session = self.session(token).await?;
        if iterate == 0 {
            return Err(JointError::InvalidArgument(
                "iterate must be at least 1".to_owned(),
            ));
        }
        let guard = session.try_begin_run().ok_or_else(|| JointError::Busy {
            key: session.key().clone(),
        })?;
        session.clear_stop();
        Ok(guard)
    }

    async fn create_process(
        &self,
        components: &ComponentSet,
        file: &str,
        key: &SessionKey,
    ) -> Result<Option<ProcessId>, RemoteError> {
        let service = &components.at_simulation;
        if !gateway::is_available(self.gateway.as_ref(), service, key).await {
            return Ok(None);
        }
        let created = self
            .gateway
            .invoke(service, CREATE_PROCESS, json!({"file": file}), key)
            .await?;
        Ok(ProcessId::from_value(&created))
    }

    async fn release_process(&self, session: &Session) {
        let Some(process) = session.process_id().await else {
            return;
        };
        let service = &session.components().at_simulation;
        if !gateway::is_available(self.gateway.as_ref(), service, session.key()).await {
            return;
        }
        if let Err(e) = self
            .gateway
            .invoke(
                service,
                KILL_PROCESS,
                json!({"process_id": process.as_str()}),
                session.key(),
            )
            .await
        {
            warn!(session = %session.key(), process_id = process.as_str(), error = %e, "failed to kill released process");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use joint_types::{AT_BLACKBOARD, AT_SIMULATION, AT_SOLVER, AT_TEMPORAL_SOLVER};
    use serde_json::{Value, json};

    use super::*;
    use crate::debug::{DEBUG_METHOD, DEFAULT_DEBUGGER};
    use crate::stages::{self, PROCESS_TACT, RUN, RUN_TICK, SET_ITEMS};
    use crate::testing::ScriptedGateway;

    const TOKEN: Option<&str> = Some("token-1");

    fn setup(gateway: ScriptedGateway) -> (Arc<ScriptedGateway>, Joint) {
        let gateway = Arc::new(gateway);
        let joint = Joint::with_memory_store(
            Arc::clone(&gateway) as Arc<dyn ServiceGateway>,
            DEFAULT_DEBUGGER,
        );
        (gateway, joint)
    }

    fn roles(file: &str) -> ComponentRoles {
        ComponentRoles {
            at_simulation_file: Some(file.to_owned()),
            ..ComponentRoles::default()
        }
    }

    fn tick(name: &str, level: i64) -> Value {
        json!({"resources": [{"resource_name": name, "level": level}]})
    }

    async fn flush_debug(joint: &Joint, token: Option<&str>) {
        joint.debug_events().flush(&SessionKey::resolve(token)).await;
    }

    async fn wait_until_idle(joint: &Joint) {
        let session = joint.session(TOKEN).await.unwrap();
        while session.is_running() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    // -----------------------------------------------------------------------
    // Registry
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn unconfigured_session_is_rejected_everywhere() {
        let (_, joint) = setup(ScriptedGateway::with_all_services());

        assert!(!joint.is_configured(TOKEN).await);
        assert!(matches!(
            joint.process_tact(1, 0, TOKEN).await,
            Err(JointError::NotConfigured { .. })
        ));
        assert!(matches!(
            joint.get_config(TOKEN).await,
            Err(JointError::NotConfigured { .. })
        ));
        assert!(matches!(
            joint.reset(TOKEN).await,
            Err(JointError::NotConfigured { .. })
        ));
        assert!(matches!(
            joint.component_state(TOKEN).await,
            Err(JointError::NotConfigured { .. })
        ));
        assert!(!joint.teardown(TOKEN).await.unwrap());
    }

    #[tokio::test]
    async fn configure_requires_a_simulation_file() {
        let (gateway, joint) = setup(ScriptedGateway::with_all_services());
        let err = joint
            .configure(&ComponentRoles::default(), TOKEN)
            .await
            .unwrap_err();
        assert!(matches!(err, JointError::MissingFile { .. }));

        let err = joint.configure(&roles(""), TOKEN).await.unwrap_err();
        assert!(matches!(err, JointError::MissingFile { .. }));
        assert!(!joint.is_configured(TOKEN).await);
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn configure_binds_components_and_process() {
        let (gateway, joint) = setup(ScriptedGateway::with_all_services());
        let roles = ComponentRoles {
            at_solver: Some("SolverB".to_owned()),
            ..roles("plant.sm")
        };
        assert!(joint.configure(&roles, TOKEN).await.unwrap());

        let config = joint.get_config(TOKEN).await.unwrap();
        assert_eq!(config.at_solver, "SolverB");
        assert_eq!(config.at_simulation, AT_SIMULATION);

        let created = gateway.calls_to(AT_SIMULATION, CREATE_PROCESS);
        assert_eq!(created.len(), 1);
        assert_eq!(created.first().unwrap().args, json!({"file": "plant.sm"}));

        let session = joint.session(TOKEN).await.unwrap();
        assert_eq!(
            session.process_id().await,
            Some(ProcessId::new("ATSimulation-process-1"))
        );
        assert_eq!(session.simulation_file(), "plant.sm");
    }

    #[tokio::test]
    async fn missing_token_uses_default_session() {
        let (_, joint) = setup(ScriptedGateway::with_all_services());
        joint.configure(&roles("a.sm"), None).await.unwrap();
        assert!(joint.is_configured(Some("")).await);
        assert!(joint.is_configured(Some("default")).await);
        assert!(!joint.is_configured(TOKEN).await);
    }

    #[tokio::test]
    async fn configure_without_simulation_binds_no_process() {
        let gateway = ScriptedGateway::new();
        gateway.register(AT_BLACKBOARD);
        let (gateway, joint) = setup(gateway);
        joint.configure(&roles("a.sm"), TOKEN).await.unwrap();
        let session = joint.session(TOKEN).await.unwrap();
        assert!(session.process_id().await.is_none());
        assert!(gateway.calls_to(AT_SIMULATION, CREATE_PROCESS).is_empty());
    }

    #[tokio::test]
    async fn reconfigure_kills_previous_process() {
        let (gateway, joint) = setup(ScriptedGateway::with_all_services());
        joint.configure(&roles("a.sm"), TOKEN).await.unwrap();
        joint.configure(&roles("b.sm"), TOKEN).await.unwrap();

        let killed = gateway.calls_to(AT_SIMULATION, KILL_PROCESS);
        assert_eq!(killed.len(), 1);
        assert_eq!(
            killed.first().unwrap().args,
            json!({"process_id": "ATSimulation-process-1"})
        );
        let session = joint.session(TOKEN).await.unwrap();
        assert_eq!(session.simulation_file(), "b.sm");
    }

    #[tokio::test]
    async fn component_state_reports_each_role() {
        let gateway = ScriptedGateway::new();
        gateway.register(AT_SIMULATION);
        gateway.register_unconfigured(AT_SOLVER);
        let (_, joint) = setup(gateway);
        joint.configure(&roles("a.sm"), TOKEN).await.unwrap();

        let states = joint.component_state(TOKEN).await.unwrap();
        assert_eq!(states.len(), 4);
        let by_role = |role: Role| states.iter().find(|s| s.role == role).unwrap().clone();
        assert!(by_role(Role::AtSimulation).registered);
        assert!(by_role(Role::AtSimulation).configured);
        assert!(by_role(Role::AtSolver).registered);
        assert!(!by_role(Role::AtSolver).configured);
        assert!(!by_role(Role::AtTemporalSolver).registered);
        assert_eq!(by_role(Role::AtBlackboard).name, AT_BLACKBOARD);
    }

    #[tokio::test]
    async fn teardown_forgets_session_and_kills_process() {
        let (gateway, joint) = setup(ScriptedGateway::with_all_services());
        joint.configure(&roles("a.sm"), TOKEN).await.unwrap();
        assert!(joint.teardown(TOKEN).await.unwrap());
        assert!(!joint.is_configured(TOKEN).await);
        assert_eq!(gateway.calls_to(AT_SIMULATION, KILL_PROCESS).len(), 1);
    }

    // -----------------------------------------------------------------------
    // Tact runs
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn single_tact_pairs_its_own_simulation_output() {
        let (gateway, joint) = setup(ScriptedGateway::with_all_services());
        gateway.respond(AT_SIMULATION, RUN_TICK, tick("Tank", 7));
        gateway.respond(AT_TEMPORAL_SOLVER, PROCESS_TACT, json!({"signified": {"alarm": true}}));
        gateway.respond(AT_SOLVER, RUN, json!({"wm": {"k1": {"content": 5}}}));
        joint.configure(&roles("a.sm"), TOKEN).await.unwrap();

        let results = joint.process_tact(1, 1000, TOKEN).await.unwrap();
        assert_eq!(results.len(), 1);
        let result = results.first().unwrap();
        assert_eq!(result.tact, 0);
        let resources = &result.at_simulation;
        assert_eq!(resources.first().unwrap().name, "Tank");
        assert_eq!(resources.first().unwrap().parameters["level"], 7);
        assert_eq!(result.at_temporal_solver["signified"]["alarm"], true);
        assert_eq!(result.at_solver["wm"]["k1"]["content"], 5);

        let writes = gateway.calls_to(AT_BLACKBOARD, SET_ITEMS);
        let written: Vec<Value> = writes.into_iter().map(|c| c.args).collect();
        assert_eq!(
            written,
            vec![
                json!({"items": [{"ref": "Tank.level", "value": 7}]}),
                json!({"items": [{"ref": "alarm", "value": true}]}),
                json!({"items": [{
                    "ref": "k1", "value": 5,
                    "belief": null, "probability": null, "accuracy": null
                }]}),
            ]
        );
    }

    #[tokio::test]
    async fn debug_events_follow_stage_order_and_end_with_stop() {
        let (gateway, joint) = setup(ScriptedGateway::with_all_services());
        joint.configure(&roles("a.sm"), TOKEN).await.unwrap();
        let _ = joint.process_tact(1, 0, TOKEN).await.unwrap();
        flush_debug(&joint, TOKEN).await;

        let events = gateway.debug_events();
        let initiators: Vec<&str> = events.iter().map(|e| e.initiator.as_str()).collect();
        assert_eq!(
            initiators,
            vec!["at_simulation", "at_temporal_solver", "at_solver", "at_joint"]
        );
        assert_eq!(events.last().unwrap().data, json!({"stop": true}));
        let calls = gateway.calls_to(DEFAULT_DEBUGGER, DEBUG_METHOD);
        assert!(calls.iter().all(|c| c.session.as_str() == "token-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn multi_tact_results_are_ordered_and_paired() {
        let (gateway, joint) = setup(ScriptedGateway::with_all_services());
        gateway.respond_sequence(
            AT_SIMULATION,
            RUN_TICK,
            vec![tick("R", 0), tick("R", 1), tick("R", 2)],
        );
        gateway.respond_sequence(
            AT_SOLVER,
            RUN,
            vec![json!({"wm": {"s": {"content": 0}}}), json!({"wm": {"s": {"content": 1}}}), json!({"wm": {"s": {"content": 2}}})],
        );
        joint.configure(&roles("a.sm"), TOKEN).await.unwrap();

        let results = joint.process_tact(3, 10, TOKEN).await.unwrap();
        assert_eq!(results.len(), 3);
        for (index, result) in results.iter().enumerate() {
            let expected = i64::try_from(index).unwrap();
            assert_eq!(result.tact, u64::try_from(index).unwrap());
            let level = &result.at_simulation.first().unwrap().parameters["level"];
            assert_eq!(level, &json!(expected));
            assert_eq!(result.at_solver["wm"]["s"]["content"], json!(expected));
        }
        assert_eq!(gateway.calls_to(AT_SIMULATION, RUN_TICK).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn next_tick_is_fetched_while_previous_tact_is_solving() {
        let (gateway, joint) = setup(ScriptedGateway::with_all_services());
        gateway.delay(AT_TEMPORAL_SOLVER, PROCESS_TACT, Duration::from_millis(100));
        joint.configure(&roles("a.sm"), TOKEN).await.unwrap();

        let results = joint.process_tact(2, 0, TOKEN).await.unwrap();
        assert_eq!(results.len(), 2);

        let second_tick = gateway.position_of(AT_SIMULATION, RUN_TICK, 1).unwrap();
        let first_solve = gateway.position_of(AT_SOLVER, RUN, 0).unwrap();
        assert!(second_tick < first_solve);
    }

    #[tokio::test]
    async fn stop_is_observed_before_the_next_tact() {
        let (gateway, joint) = setup(ScriptedGateway::with_all_services());
        joint.configure(&roles("a.sm"), TOKEN).await.unwrap();

        let session = joint.session(TOKEN).await.unwrap();
        let ticks = AtomicUsize::new(0);
        gateway.on_call(AT_SIMULATION, RUN_TICK, move |_| {
            if ticks.fetch_add(1, Ordering::SeqCst) == 1 {
                session.request_stop();
            }
        });

        let results = joint.process_tact(5, 0, TOKEN).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(gateway.calls_to(AT_SIMULATION, RUN_TICK).len(), 2);
        flush_debug(&joint, TOKEN).await;
        assert_eq!(gateway.debug_events().last().unwrap().data, json!({"stop": true}));
    }

    #[tokio::test]
    async fn stop_before_a_run_is_cleared_on_entry() {
        let (_, joint) = setup(ScriptedGateway::with_all_services());
        joint.configure(&roles("a.sm"), TOKEN).await.unwrap();
        joint.stop(TOKEN).await;
        let results = joint.process_tact(2, 0, TOKEN).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn stop_for_unknown_session_is_a_no_op() {
        let (_, joint) = setup(ScriptedGateway::with_all_services());
        joint.stop(Some("nobody")).await;
        assert!(!joint.is_configured(Some("nobody")).await);
    }

    #[tokio::test]
    async fn zero_iterations_are_rejected() {
        let (_, joint) = setup(ScriptedGateway::with_all_services());
        joint.configure(&roles("a.sm"), TOKEN).await.unwrap();
        assert!(matches!(
            joint.process_tact(0, 0, TOKEN).await,
            Err(JointError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn absent_optional_services_degrade_to_defaults() {
        let gateway = ScriptedGateway::new();
        gateway.register(AT_BLACKBOARD);
        let (gateway, joint) = setup(gateway);
        joint.configure(&roles("a.sm"), TOKEN).await.unwrap();

        let results = joint.process_tact(2, 0, TOKEN).await.unwrap();
        assert_eq!(results.len(), 2);
        for result in &results {
            assert!(result.at_simulation.is_empty());
            assert_eq!(result.at_temporal_solver, stages::default_temporal_result());
            assert_eq!(result.at_solver, stages::default_solver_result());
        }
        // Blackboard writes still happen, with empty item lists.
        assert_eq!(gateway.calls_to(AT_BLACKBOARD, SET_ITEMS).len(), 6);
    }

    #[tokio::test]
    async fn remote_failure_aborts_the_run_and_releases_the_session() {
        let (gateway, joint) = setup(ScriptedGateway::with_all_services());
        gateway.fail(AT_SOLVER, RUN, "solver crashed");
        joint.configure(&roles("a.sm"), TOKEN).await.unwrap();

        let err = joint.process_tact(3, 0, TOKEN).await.unwrap_err();
        assert!(matches!(err, JointError::Remote { .. }));
        assert!(gateway.calls_to(AT_SIMULATION, RUN_TICK).len() <= 2);

        let session = joint.session(TOKEN).await.unwrap();
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn blackboard_failure_propagates() {
        let (gateway, joint) = setup(ScriptedGateway::with_all_services());
        gateway.fail(AT_BLACKBOARD, SET_ITEMS, "bb down");
        joint.configure(&roles("a.sm"), TOKEN).await.unwrap();
        assert!(joint.process_tact(1, 0, TOKEN).await.is_err());
    }

    // -----------------------------------------------------------------------
    // Background runs and busy sessions
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn concurrent_run_for_same_session_is_busy() {
        let (gateway, joint) = setup(ScriptedGateway::with_all_services());
        gateway.delay(AT_SIMULATION, RUN_TICK, Duration::from_millis(50));
        joint.configure(&roles("a.sm"), TOKEN).await.unwrap();

        assert!(joint.process_tact_background(2, 0, TOKEN).await.unwrap());
        assert!(matches!(
            joint.process_tact(1, 0, TOKEN).await,
            Err(JointError::Busy { .. })
        ));
        assert!(matches!(
            joint.configure(&roles("b.sm"), TOKEN).await,
            Err(JointError::Busy { .. })
        ));

        wait_until_idle(&joint).await;
        flush_debug(&joint, TOKEN).await;
        assert_eq!(gateway.calls_to(AT_SIMULATION, RUN_TICK).len(), 2);
        assert_eq!(gateway.debug_events().last().unwrap().data, json!({"stop": true}));
    }

    #[tokio::test]
    async fn other_sessions_are_independent() {
        let (gateway, joint) = setup(ScriptedGateway::with_all_services());
        gateway.delay(AT_SIMULATION, RUN_TICK, Duration::from_millis(50));
        joint.configure(&roles("a.sm"), TOKEN).await.unwrap();
        joint.configure(&roles("b.sm"), Some("token-2")).await.unwrap();

        assert!(joint.process_tact_background(1, 0, TOKEN).await.unwrap());
        let results = joint.process_tact(1, 0, Some("token-2")).await.unwrap();
        assert_eq!(results.len(), 1);
        wait_until_idle(&joint).await;
    }

    #[tokio::test]
    async fn failed_background_run_publishes_error_event() {
        let (gateway, joint) = setup(ScriptedGateway::with_all_services());
        gateway.fail(AT_SIMULATION, RUN_TICK, "simulation crashed");
        joint.configure(&roles("a.sm"), TOKEN).await.unwrap();

        assert!(joint.process_tact_background(1, 0, TOKEN).await.unwrap());
        wait_until_idle(&joint).await;
        // The error event is queued after the run releases the session.
        tokio::time::sleep(Duration::from_millis(10)).await;
        flush_debug(&joint, TOKEN).await;

        let last = gateway.debug_events().last().cloned().unwrap();
        assert_eq!(last.initiator, "at_joint");
        assert_eq!(last.data["kind"], "remote");
    }

    // -----------------------------------------------------------------------
    // Reset
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn reset_recreates_process_from_remembered_file() {
        let (gateway, joint) = setup(ScriptedGateway::with_all_services());
        joint.configure(&roles("plant.sm"), TOKEN).await.unwrap();

        assert!(joint.reset(TOKEN).await.unwrap());

        let killed = gateway.calls_to(AT_SIMULATION, KILL_PROCESS);
        assert_eq!(
            killed.first().unwrap().args,
            json!({"process_id": "ATSimulation-process-1"})
        );
        let created = gateway.calls_to(AT_SIMULATION, CREATE_PROCESS);
        assert_eq!(created.len(), 2);
        assert!(created.iter().all(|c| c.args == json!({"file": "plant.sm"})));

        let _ = joint.process_tact(1, 0, TOKEN).await.unwrap();
        let ticks = gateway.calls_to(AT_SIMULATION, RUN_TICK);
        assert_eq!(
            ticks.first().unwrap().args,
            json!({"process_id": "ATSimulation-process-2"})
        );
    }

    #[tokio::test]
    async fn reset_does_not_touch_solvers() {
        let (gateway, joint) = setup(ScriptedGateway::with_all_services());
        joint.configure(&roles("plant.sm"), TOKEN).await.unwrap();
        let _ = joint.reset(TOKEN).await.unwrap();
        assert!(
            gateway
                .calls()
                .iter()
                .all(|c| c.service == AT_SIMULATION)
        );
    }

    #[tokio::test]
    async fn reset_with_empty_create_reply_leaves_no_process() {
        let (gateway, joint) = setup(ScriptedGateway::with_all_services());
        joint.configure(&roles("plant.sm"), TOKEN).await.unwrap();
        gateway.respond(AT_SIMULATION, CREATE_PROCESS, Value::Null);

        assert!(joint.reset(TOKEN).await.unwrap());
        let session = joint.session(TOKEN).await.unwrap();
        assert!(session.process_id().await.is_none());

        let results = joint.process_tact(1, 0, TOKEN).await.unwrap();
        assert!(results.first().unwrap().at_simulation.is_empty());
        assert!(gateway.calls_to(AT_SIMULATION, RUN_TICK).is_empty());
    }

    // -----------------------------------------------------------------------
    // Debugger isolation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn slow_debugger_does_not_delay_a_run() {
        let (gateway, joint) = setup(ScriptedGateway::with_all_services());
        gateway.delay(DEFAULT_DEBUGGER, DEBUG_METHOD, Duration::from_secs(2));
        joint.configure(&roles("a.sm"), TOKEN).await.unwrap();

        let started = tokio::time::Instant::now();
        let results = joint.process_tact(3, 0, TOKEN).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn slow_debugger_does_not_delay_other_sessions() {
        let (gateway, joint) = setup(ScriptedGateway::with_all_services());
        gateway.delay(DEFAULT_DEBUGGER, DEBUG_METHOD, Duration::from_secs(2));
        joint.configure(&roles("a.sm"), TOKEN).await.unwrap();
        joint.configure(&roles("b.sm"), Some("token-2")).await.unwrap();

        assert!(joint.process_tact_background(3, 0, TOKEN).await.unwrap());
        let started = tokio::time::Instant::now();
        let results = joint.process_tact(1, 0, Some("token-2")).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn failing_debugger_does_not_fail_a_run() {
        let (gateway, joint) = setup(ScriptedGateway::with_all_services());
        gateway.fail(DEFAULT_DEBUGGER, DEBUG_METHOD, "debugger down");
        joint.configure(&roles("a.sm"), TOKEN).await.unwrap();

        let results = joint.process_tact(2, 0, TOKEN).await.unwrap();
        assert_eq!(results.len(), 2);
        flush_debug(&joint, TOKEN).await;
        // Every stage event was attempted, plus the final stop.
        assert_eq!(gateway.calls_to(DEFAULT_DEBUGGER, DEBUG_METHOD).len(), 7);
    }

    #[tokio::test]
    async fn service_dropping_off_between_runs_degrades_to_default() {
        let (gateway, joint) = setup(ScriptedGateway::with_all_services());
        gateway.respond(AT_SOLVER, RUN, json!({"wm": {"k": {"content": 1}}}));
        joint.configure(&roles("a.sm"), TOKEN).await.unwrap();

        let first = joint.process_tact(1, 0, TOKEN).await.unwrap();
        assert_eq!(first.first().unwrap().at_solver["wm"]["k"]["content"], 1);

        gateway.unregister(AT_SOLVER);
        let second = joint.process_tact(1, 0, TOKEN).await.unwrap();
        assert_eq!(second.first().unwrap().at_solver, stages::default_solver_result());
        assert_eq!(gateway.calls_to(AT_SOLVER, RUN).len(), 1);
    }

    // -----------------------------------------------------------------------
    // Replacing and removing sessions under concurrency
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn run_cannot_start_while_session_is_being_replaced() {
        let (gateway, joint) = setup(ScriptedGateway::with_all_services());
        joint.configure(&roles("a.sm"), TOKEN).await.unwrap();
        let original = joint.session(TOKEN).await.unwrap();
        gateway.delay(AT_SIMULATION, CREATE_PROCESS, Duration::from_millis(100));

        let replacing = {
            let joint = joint.clone();
            tokio::spawn(async move { joint.configure(&roles("b.sm"), TOKEN).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(matches!(
            joint.process_tact_background(20, 0, TOKEN).await,
            Err(JointError::Busy { .. })
        ));
        assert!(replacing.await.unwrap().unwrap());

        assert!(gateway.calls_to(AT_SIMULATION, RUN_TICK).is_empty());
        assert!(!original.is_running());
        let session = joint.session(TOKEN).await.unwrap();
        assert!(!Arc::ptr_eq(&session, &original));
        assert_eq!(session.simulation_file(), "b.sm");

        // Stop reaches the record that runs now.
        assert!(joint.process_tact_background(1, 0, TOKEN).await.unwrap());
        joint.stop(TOKEN).await;
        assert!(session.is_stop_requested());
        wait_until_idle(&joint).await;
    }

    #[tokio::test]
    async fn racing_first_configures_keep_one_session() {
        let (gateway, joint) = setup(ScriptedGateway::with_all_services());
        gateway.delay(AT_SIMULATION, CREATE_PROCESS, Duration::from_millis(50));

        let first = {
            let joint = joint.clone();
            tokio::spawn(async move { joint.configure(&roles("a.sm"), TOKEN).await })
        };
        let second = {
            let joint = joint.clone();
            tokio::spawn(async move { joint.configure(&roles("b.sm"), TOKEN).await })
        };
        let outcomes = [first.await.unwrap(), second.await.unwrap()];

        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
        assert!(
            outcomes
                .iter()
                .any(|o| matches!(o, Err(JointError::Busy { .. })))
        );
        // The loser's process is given back.
        assert_eq!(gateway.calls_to(AT_SIMULATION, KILL_PROCESS).len(), 1);
        assert!(joint.is_configured(TOKEN).await);
    }

    #[tokio::test]
    async fn teardown_during_run_is_busy() {
        let (gateway, joint) = setup(ScriptedGateway::with_all_services());
        gateway.delay(AT_SIMULATION, RUN_TICK, Duration::from_millis(50));
        joint.configure(&roles("a.sm"), TOKEN).await.unwrap();

        assert!(joint.process_tact_background(1, 0, TOKEN).await.unwrap());
        assert!(matches!(
            joint.teardown(TOKEN).await,
            Err(JointError::Busy { .. })
        ));
        assert!(joint.is_configured(TOKEN).await);

        wait_until_idle(&joint).await;
        assert!(joint.teardown(TOKEN).await.unwrap());
        assert!(!joint.is_configured(TOKEN).await);
    }
}
