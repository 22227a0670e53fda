//! Persists and fans out each parsed event from a running agent.

use std::collections::HashMap;
use std::sync::Arc;

use agent_core_common::{AgentId, AgentMessage};
use agent_core_store::MessageStore;
use tokio::sync::{mpsc, RwLock};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::error::{classify_store_error, OrchestratorError, OrchestratorResult};
use crate::parser::{ParsedEvent, Parser};
use crate::runner::RawEventSource;

/// Opaque handle identifying one subscriber of an agent's message stream,
/// returned by `subscribe` and required by `unsubscribe` to remove just
/// that observer without disturbing any other subscriber of the same
/// agent (spec.md §4.2, §9 "observer fan-out with weak-ish semantics").
pub type ObserverId = Uuid;

type AgentObservers = HashMap<ObserverId, mpsc::Sender<AgentMessage>>;

/// Per-agent subscriber fan-out plus the write path into `MessageStore`.
/// Each agent's observers are tracked individually (rather than as a
/// single broadcast channel) so that one observer can unsubscribe without
/// closing the stream for the others.
pub struct StreamingService {
    store: MessageStore,
    observers: RwLock<HashMap<AgentId, AgentObservers>>,
    channel_capacity: usize,
    unique_violation_retries: u32,
}

impl StreamingService {
    pub fn new(store: MessageStore, channel_capacity: usize, unique_violation_retries: u32) -> Self {
        Self {
            store,
            observers: RwLock::new(HashMap::new()),
            channel_capacity,
            unique_violation_retries,
        }
    }

    /// Subscribes to an agent's live message stream. Safe to call before
    /// the agent has emitted anything. Returns the new observer's id
    /// (pass to `unsubscribe` to remove just this observer) and the
    /// receiving half of its channel, bounded by `channel_capacity`.
    pub async fn subscribe(&self, agent_id: AgentId) -> (ObserverId, mpsc::Receiver<AgentMessage>) {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let observer_id = Uuid::new_v4();
        self.observers
            .write()
            .await
            .entry(agent_id)
            .or_default()
            .insert(observer_id, tx);
        (observer_id, rx)
    }

    /// Removes one observer from an agent's subscriber set. No error if
    /// the agent or the observer is already absent.
    pub async fn unsubscribe(&self, agent_id: AgentId, observer_id: ObserverId) {
        if let Some(observers) = self.observers.write().await.get_mut(&agent_id) {
            observers.remove(&observer_id);
        }
    }

    /// Persists one parsed event and broadcasts it to current subscribers.
    /// A `UniqueViolation` is retried by the store itself up to
    /// `unique_violation_retries`; a `ForeignKeyViolation` (the agent row
    /// vanished, e.g. via cascade delete mid-stream) is logged and
    /// dropped rather than propagated, since the agent no longer exists
    /// for anyone to observe.
    #[instrument(skip(self, event), fields(agent_id = %agent_id))]
    pub async fn on_event(&self, agent_id: AgentId, event: ParsedEvent) -> OrchestratorResult<()> {
        let ParsedEvent {
            message_type,
            role,
            content,
            metadata,
        } = event;

        let saved = self
            .store
            .save(
                agent_id,
                message_type,
                role,
                content,
                metadata,
                self.unique_violation_retries,
            )
            .await;

        let message = match saved {
            Ok(message) => message,
            Err(e) => {
                let err = classify_store_error(e);
                if matches!(err, OrchestratorError::ForeignKeyViolation(_)) {
                    warn!(%agent_id, "dropping event for agent with no row");
                    return Ok(());
                }
                return Err(err);
            }
        };

        // Snapshot the current observers under the lock, then dispatch
        // outside it so a slow or misbehaving observer never blocks
        // another observer's delivery or holds the lock across the send
        // (spec.md §5 "iteration copies to a local snapshot"). `try_send`
        // rather than `send` so a full channel (a subscriber not keeping
        // up) is logged and dropped instead of stalling the runner.
        let snapshot: Vec<(ObserverId, mpsc::Sender<AgentMessage>)> = self
            .observers
            .read()
            .await
            .get(&agent_id)
            .map(|observers| observers.iter().map(|(id, tx)| (*id, tx.clone())).collect())
            .unwrap_or_default();

        let mut dead = Vec::new();
        for (observer_id, tx) in snapshot {
            match tx.try_send(message.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!(%agent_id, %observer_id, "observer channel closed, dropping subscription");
                    dead.push(observer_id);
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(%agent_id, %observer_id, "observer channel full, dropping event for this observer");
                }
            }
        }
        if !dead.is_empty() {
            if let Some(observers) = self.observers.write().await.get_mut(&agent_id) {
                for observer_id in dead {
                    observers.remove(&observer_id);
                }
            }
        }
        Ok(())
    }

    /// Drives `source` line by line through `parser`, persisting and
    /// broadcasting each non-dropped event, until the source is
    /// exhausted or returns an error.
    pub async fn drive(
        &self,
        agent_id: AgentId,
        mut source: Box<dyn RawEventSource>,
        parser: Arc<dyn Parser>,
    ) -> OrchestratorResult<()> {
        loop {
            match source.next_line().await? {
                Some(line) => match parser.parse(&line) {
                    Ok(Some(event)) => self.on_event(agent_id, event).await?,
                    Ok(None) => continue,
                    Err(e) => warn!(%agent_id, error = %e, "dropping unparseable line"),
                },
                None => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{ClaudeStyleParser, Parser};
    use crate::runner::{ScriptedEvent, SyntheticSource};
    use agent_core_common::{Agent, AgentType, Configuration, MessageType};
    use agent_core_store::{connect_in_memory, AgentStore};
    use std::time::Duration;

    async fn service() -> (StreamingService, Agent) {
        let pool = connect_in_memory().await.unwrap();
        let agent_store = AgentStore::new(pool.clone());
        let message_store = MessageStore::new(pool);

        let agent = Agent::new(AgentType::Synthetic, "hi".into(), Configuration::new()).unwrap();
        agent_store.insert(&agent).await.unwrap();

        (StreamingService::new(message_store, 64, 5), agent)
    }

    #[tokio::test]
    async fn on_event_persists_and_broadcasts() {
        let (service, agent) = service().await;
        let (_observer_id, mut rx) = service.subscribe(agent.id).await;

        let event = ParsedEvent {
            message_type: MessageType::Assistant,
            role: Some("assistant".into()),
            content: "hi".into(),
            metadata: None,
        };
        service.on_event(agent.id, event).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.sequence_number, 1);
    }

    #[tokio::test]
    async fn unsubscribing_one_observer_does_not_affect_another() {
        let (service, agent) = service().await;
        let (observer_a, mut rx_a) = service.subscribe(agent.id).await;
        let (_observer_b, mut rx_b) = service.subscribe(agent.id).await;

        service.unsubscribe(agent.id, observer_a).await;

        let event = ParsedEvent {
            message_type: MessageType::Assistant,
            role: None,
            content: "still here".into(),
            metadata: None,
        };
        service.on_event(agent.id, event).await.unwrap();

        assert!(rx_a.recv().await.is_none());
        assert_eq!(rx_b.recv().await.unwrap().sequence_number, 1);
    }

    #[tokio::test]
    async fn unsubscribing_an_absent_observer_is_a_no_op() {
        let (service, agent) = service().await;
        service.unsubscribe(agent.id, ObserverId::new_v4()).await;
    }

    #[tokio::test]
    async fn on_event_for_unknown_agent_is_dropped_not_errored() {
        let pool = connect_in_memory().await.unwrap();
        let message_store = MessageStore::new(pool);
        let service = StreamingService::new(message_store, 64, 5);

        let event = ParsedEvent {
            message_type: MessageType::Assistant,
            role: None,
            content: "orphan".into(),
            metadata: None,
        };
        let result = service.on_event(AgentId::new(), event).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn drive_processes_synthetic_schedule_end_to_end() {
        let (service, agent) = service().await;
        let (_observer_id, mut rx) = service.subscribe(agent.id).await;

        let schedule = vec![
            ScriptedEvent::new(
                Duration::ZERO,
                r#"{"type":"content_block_delta","delta":{"text":"hi"}}"#,
            ),
            ScriptedEvent::new(Duration::ZERO, r#"{"type":"result","usage":{"tokens":1}}"#),
        ];
        let source = Box::new(SyntheticSource::new(schedule));
        let parser: Arc<dyn Parser> = Arc::new(ClaudeStyleParser);

        service.drive(agent.id, source, parser).await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.sequence_number, 1);
        assert_eq!(second.sequence_number, 2);
    }
}
