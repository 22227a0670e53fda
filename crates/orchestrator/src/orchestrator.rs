//! Core orchestrator: owns agent state, runner lifecycles, and the
//! subscriber fan-out, and exposes the narrow `launch_direct` entry point
//! the launch queue drives.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agent_core_common::{Agent, AgentId, AgentMessage, AgentType, LaunchRequest};
use agent_core_store::AgentStore;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{info, instrument, warn};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::launch_queue::LaunchFn;
use crate::parser::{ClaudeStyleParser, Parser};
use crate::runner::{ProviderKind, RawEventSource, ScriptedEvent, SubprocessSource, SyntheticSource};
use crate::streaming::{ObserverId, StreamingService};

struct RunningRunner {
    stop_tx: oneshot::Sender<()>,
}

type AgentMap = Arc<RwLock<HashMap<AgentId, Agent>>>;

/// Owns every live `Agent`, its runner, and the streaming pipeline feeding
/// its subscribers. Constructed once per process; the launch queue holds
/// only a closure into `launch_direct`, never this type directly, which
/// is what lets the queue and orchestrator be built independently of each
/// other's concrete types.
pub struct Orchestrator {
    agent_store: AgentStore,
    streaming: Arc<StreamingService>,
    agents: AgentMap,
    runners: Mutex<HashMap<AgentId, RunningRunner>>,
    stop_grace_period: Duration,
}

impl Orchestrator {
    pub fn new(agent_store: AgentStore, streaming: Arc<StreamingService>, stop_grace_period: Duration) -> Arc<Self> {
        Arc::new(Self {
            agent_store,
            streaming,
            agents: Arc::new(RwLock::new(HashMap::new())),
            runners: Mutex::new(HashMap::new()),
            stop_grace_period,
        })
    }

    /// Returns a narrow function handle into `launch_direct`, suitable
    /// for handing to `LaunchQueue::new` without exposing `Orchestrator`
    /// itself to the queue.
    pub fn launch_fn(self: &Arc<Self>) -> LaunchFn {
        let this = self.clone();
        Arc::new(move |request: LaunchRequest| {
            let this = this.clone();
            Box::pin(async move { this.launch_direct(request).await })
        })
    }

    /// Creates the Agent entity, persists it, transitions it to `running`,
    /// and only then starts its runner. The `running` transition and its
    /// map/store write are committed *before* `register_runner` spawns the
    /// task driving the stream — a synthetic (or any fast) runner can reach
    /// its terminal event before `launch_direct` would otherwise get a
    /// chance to record `running`, and `finalize_on_exit` transitions from
    /// whatever status is in the map at that moment. Committing `running`
    /// first means `finalize_on_exit` always sees a legal `running → {
    /// completed, failed }` transition instead of racing against it. On any
    /// failure the agent is marked `failed` (if it was far enough along to
    /// exist) and the error is re-raised.
    #[instrument(skip(self, request), fields(agent_type = %request.agent_type))]
    pub async fn launch_direct(&self, request: LaunchRequest) -> OrchestratorResult<AgentId> {
        let mut agent = Agent::new(request.agent_type.clone(), request.prompt.clone(), request.configuration.clone())?;
        let agent_id = agent.id;
        self.agent_store.insert(&agent).await.map_err(crate::error::classify_store_error)?;

        {
            let mut agents = self.agents.write().await;
            agents.insert(agent_id, agent.clone());
        }

        let source = match self
            .build_runner(&request.agent_type, &request.prompt, &request.configuration)
            .await
        {
            Ok(source) => source,
            Err(e) => {
                self.fail_agent(agent_id, e.to_string()).await;
                return Err(e);
            }
        };

        agent.mark_as_running()?;
        self.agent_store.update(&agent).await.map_err(crate::error::classify_store_error)?;
        self.agents.write().await.insert(agent_id, agent);

        self.register_runner(agent_id, source, Arc::new(ClaudeStyleParser)).await?;

        info!(%agent_id, "agent launched and running");
        Ok(agent_id)
    }

    async fn build_runner(
        &self,
        agent_type: &AgentType,
        prompt: &str,
        configuration: &agent_core_common::Configuration,
    ) -> OrchestratorResult<Box<dyn RawEventSource>> {
        match agent_type {
            AgentType::Synthetic => Ok(Box::new(SyntheticSource::new(synthetic_schedule_from_configuration(
                configuration,
            )))),
            AgentType::ClaudeCli => Ok(Box::new(SubprocessSource::spawn(
                ProviderKind::ClaudeCli,
                prompt,
                self.stop_grace_period,
            )?)),
            AgentType::GeminiCli => Ok(Box::new(SubprocessSource::spawn(
                ProviderKind::GeminiCli,
                prompt,
                self.stop_grace_period,
            )?)),
            // `claude-sdk` and `claude-python-proxy` stream over HTTP/SSE
            // against a live endpoint this launcher doesn't have
            // connection details for; callers driving those variants use
            // `register_runner` directly with `HttpStreamSource` /
            // `SseProxySource`, bypassing `launch_direct`'s CLI-oriented
            // defaults.
            other => Err(OrchestratorError::RunnerStartFailure {
                agent_id: other.to_string(),
                reason: "runner variant requires a live endpoint; use register_runner directly".to_string(),
            }),
        }
    }

    /// Registers `source`/`parser` as the running agent's runner and
    /// spawns the task driving it through the streaming service.
    /// Idempotent per `agent_id` is enforced: a second registration
    /// without an intervening `terminate` is an error.
    pub async fn register_runner(
        &self,
        agent_id: AgentId,
        source: Box<dyn RawEventSource>,
        parser: Arc<dyn Parser>,
    ) -> OrchestratorResult<()> {
        let mut runners = self.runners.lock().await;
        if runners.contains_key(&agent_id) {
            return Err(OrchestratorError::Domain(agent_core_common::CoreError::RunnerAlreadyRegistered(
                agent_id.to_string(),
            )));
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        runners.insert(agent_id, RunningRunner { stop_tx });
        drop(runners);

        let streaming = self.streaming.clone();
        let agent_store = self.agent_store.clone();
        let agents = self.agents.clone();
        tokio::spawn(drive_runner(agent_id, source, parser, streaming, agent_store, agents, stop_rx));
        Ok(())
    }

    /// Registers a new observer for the agent's live message stream,
    /// creating its subscriber set lazily if the agent hasn't emitted
    /// anything yet. Matches the "subscribe before first event"
    /// allowance. Returns the observer's id (pass to `unsubscribe` to
    /// remove just this observer) and the receiving half of its channel.
    pub async fn subscribe(
        &self,
        agent_id: AgentId,
    ) -> OrchestratorResult<(ObserverId, mpsc::Receiver<AgentMessage>)> {
        if !self.agents.read().await.contains_key(&agent_id) {
            return Err(OrchestratorError::UnknownAgent(agent_id.to_string()));
        }
        Ok(self.streaming.subscribe(agent_id).await)
    }

    /// Removes one observer from the agent's subscriber set. No error if
    /// the agent or the observer is already absent — removing one
    /// observer never affects any other.
    pub async fn unsubscribe(&self, agent_id: AgentId, observer_id: ObserverId) {
        self.streaming.unsubscribe(agent_id, observer_id).await;
    }

    /// Stops the agent's runner and transitions it to `terminated`. An
    /// agent with no registered runner (already stopped, or never
    /// started) still has its state transition attempted; terminating an
    /// agent already in a terminal state surfaces the illegal-transition
    /// error rather than silently succeeding.
    #[instrument(skip(self))]
    pub async fn terminate(&self, agent_id: AgentId) -> OrchestratorResult<()> {
        let runner = self.runners.lock().await.remove(&agent_id);
        if let Some(runner) = runner {
            let _ = runner.stop_tx.send(());
        }

        let mut agents = self.agents.write().await;
        if let Some(agent) = agents.get_mut(&agent_id) {
            agent.mark_as_terminated()?;
            self.agent_store.update(agent).await.map_err(crate::error::classify_store_error)?;
        }
        Ok(())
    }

    async fn fail_agent(&self, agent_id: AgentId, reason: String) {
        let mut agents = self.agents.write().await;
        if let Some(agent) = agents.get_mut(&agent_id) {
            if agent.mark_as_failed(reason).is_ok() {
                let _ = self.agent_store.update(agent).await;
            }
        }
    }

    pub async fn get_agent(&self, agent_id: AgentId) -> Option<Agent> {
        self.agents.read().await.get(&agent_id).cloned()
    }
}

/// Builds the `synthetic` runner's schedule from `configuration.schedule`
/// (spec.md §4.3 "scripted schedule for tests", §8 scenario 1), e.g.
/// `{"schedule": [{"delay_ms":0,"type":"message","data":{"content":"A"}},
/// {"delay_ms":0,"type":"complete"}]}`. A request with no `schedule` key
/// falls back to a single immediate terminal event, matching a bare
/// `{type: "synthetic"}` launch with nothing to play back.
fn synthetic_schedule_from_configuration(configuration: &agent_core_common::Configuration) -> Vec<ScriptedEvent> {
    match configuration.get("schedule").and_then(Value::as_array) {
        Some(entries) if !entries.is_empty() => {
            entries.iter().map(scripted_event_from_schedule_entry).collect()
        }
        _ => vec![ScriptedEvent::new(
            Duration::ZERO,
            r#"{"type":"result","usage":{"tokens":0}}"#,
        )],
    }
}

fn scripted_event_from_schedule_entry(entry: &Value) -> ScriptedEvent {
    let delay = entry
        .get("delay_ms")
        .and_then(Value::as_u64)
        .map(Duration::from_millis)
        .unwrap_or(Duration::ZERO);

    let line = match entry.get("type").and_then(Value::as_str).unwrap_or("message") {
        "complete" => r#"{"type":"result","usage":{}}"#.to_string(),
        "error" => r#"{"type":"result","is_error":true}"#.to_string(),
        _ => {
            let content = entry
                .get("data")
                .and_then(|d| d.get("content"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            serde_json::json!({"type": "message", "content": content}).to_string()
        }
    };

    ScriptedEvent::new(delay, line)
}

fn metadata_subtype(metadata: &Option<agent_core_common::Metadata>) -> Option<String> {
    metadata
        .as_ref()
        .and_then(|m| m.get("subtype"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Drives one agent's raw event source through its parser, persisting and
/// broadcasting every event via the streaming service, until the source
/// ends, errors, or a stop is requested. On natural exit (the provider
/// closes its stream), the agent transitions to `completed` if a
/// terminal `success`/`error` event was observed, or `failed` otherwise —
/// a provider that hangs up mid-stream without announcing a result is
/// itself a failure.
async fn drive_runner(
    agent_id: AgentId,
    mut source: Box<dyn RawEventSource>,
    parser: Arc<dyn Parser>,
    streaming: Arc<StreamingService>,
    agent_store: AgentStore,
    agents: AgentMap,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut saw_terminal_success = false;
    let mut saw_terminal_event = false;

    loop {
        tokio::select! {
            _ = &mut stop_rx => {
                if let Err(e) = source.stop().await {
                    warn!(%agent_id, error = %e, "error stopping runner");
                }
                return;
            }
            line = source.next_line() => {
                match line {
                    Ok(Some(line)) => match parser.parse(&line) {
                        Ok(Some(event)) => {
                            if let Some(subtype) = metadata_subtype(&event.metadata) {
                                saw_terminal_event = true;
                                saw_terminal_success = subtype == "success";
                            }
                            if let Err(e) = streaming.on_event(agent_id, event).await {
                                warn!(%agent_id, error = %e, "failed to persist/broadcast event");
                            }
                        }
                        Ok(None) => continue,
                        Err(e) => warn!(%agent_id, error = %e, "dropping unparseable line"),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!(%agent_id, error = %e, "runner stream error, ending drive loop");
                        break;
                    }
                }
            }
        }
    }

    finalize_on_exit(agent_id, saw_terminal_event, saw_terminal_success, &agent_store, &agents).await;
}

async fn finalize_on_exit(
    agent_id: AgentId,
    saw_terminal_event: bool,
    saw_terminal_success: bool,
    agent_store: &AgentStore,
    agents: &AgentMap,
) {
    let mut agents = agents.write().await;
    let Some(agent) = agents.get_mut(&agent_id) else {
        return;
    };
    if agent.status.is_terminal() {
        return;
    }

    let result = if saw_terminal_event && saw_terminal_success {
        agent.mark_as_completed()
    } else {
        agent.mark_as_failed("runner exited without a successful terminal event")
    };

    if result.is_ok() {
        if let Err(e) = agent_store.update(agent).await {
            warn!(%agent_id, error = %e, "failed to persist runner-exit state transition");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core_common::{AgentStatus, Configuration};
    use agent_core_store::{connect_in_memory, MessageStore};

    async fn test_orchestrator() -> Arc<Orchestrator> {
        let pool = connect_in_memory().await.unwrap();
        let agent_store = AgentStore::new(pool.clone());
        let message_store = MessageStore::new(pool);
        let streaming = Arc::new(StreamingService::new(message_store, 64, 5));
        Orchestrator::new(agent_store, streaming, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn launch_direct_transitions_agent_to_running() {
        let orchestrator = test_orchestrator().await;
        let request = LaunchRequest::new(AgentType::Synthetic, "hi".into(), Configuration::new());
        let agent_id = orchestrator.launch_direct(request).await.unwrap();

        let agent = orchestrator.get_agent(agent_id).await.unwrap();
        assert_eq!(agent.status, AgentStatus::Running);
    }

    #[tokio::test]
    async fn successful_terminal_event_completes_the_agent() {
        let orchestrator = test_orchestrator().await;
        let request = LaunchRequest::new(AgentType::Synthetic, "hi".into(), Configuration::new());
        let agent_id = orchestrator.launch_direct(request).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        let agent = orchestrator.get_agent(agent_id).await.unwrap();
        assert_eq!(agent.status, AgentStatus::Completed);
    }

    #[tokio::test]
    async fn synthetic_launch_plays_back_the_requested_schedule() {
        let orchestrator = test_orchestrator().await;

        let schedule = serde_json::json!([
            {"delay_ms": 0, "type": "message", "data": {"content": "A"}},
            {"delay_ms": 0, "type": "message", "data": {"content": "B"}},
            {"delay_ms": 0, "type": "complete"},
        ]);
        let mut configuration = Configuration::new();
        configuration.insert("schedule".to_string(), schedule);
        let request = LaunchRequest::new(AgentType::Synthetic, "hi".into(), configuration);

        let agent_id = orchestrator.launch_direct(request).await.unwrap();
        let (_observer_id, mut rx) = orchestrator.subscribe(agent_id).await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.content.as_str(), Some("A"));
        assert_eq!(second.content.as_str(), Some("B"));
        assert_eq!((first.sequence_number, second.sequence_number), (1, 2));

        tokio::time::sleep(Duration::from_millis(30)).await;
        let agent = orchestrator.get_agent(agent_id).await.unwrap();
        assert_eq!(agent.status, AgentStatus::Completed);
    }

    #[tokio::test]
    async fn subscribing_to_unknown_agent_errors() {
        let orchestrator = test_orchestrator().await;
        let err = orchestrator.subscribe(AgentId::new()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownAgent(_)));
    }

    #[tokio::test]
    async fn terminate_then_terminate_again_surfaces_illegal_transition() {
        let orchestrator = test_orchestrator().await;
        let request = LaunchRequest::new(AgentType::Synthetic, "hi".into(), Configuration::new());
        let agent_id = orchestrator.launch_direct(request).await.unwrap();

        orchestrator.terminate(agent_id).await.unwrap();
        let agent = orchestrator.get_agent(agent_id).await.unwrap();
        assert_eq!(agent.status, AgentStatus::Terminated);

        let err = orchestrator.terminate(agent_id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Domain(_)));
    }

    #[tokio::test]
    async fn register_runner_twice_for_same_agent_is_an_error() {
        let orchestrator = test_orchestrator().await;
        let request = LaunchRequest::new(AgentType::Synthetic, "hi".into(), Configuration::new());
        let agent_id = orchestrator.launch_direct(request).await.unwrap();

        let source = Box::new(SyntheticSource::new(vec![]));
        let err = orchestrator
            .register_runner(agent_id, source, Arc::new(ClaudeStyleParser))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Domain(agent_core_common::CoreError::RunnerAlreadyRegistered(_))));
    }
}
