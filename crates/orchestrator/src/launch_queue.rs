//! FIFO admission control for agent launches.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use agent_core_common::{AgentId, LaunchRequest};
use tokio::sync::{oneshot, Mutex, Notify};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{OrchestratorError, OrchestratorResult};

/// The orchestrator's launch entry point, captured as a narrow function
/// handle rather than a direct `Arc<Orchestrator>` dependency so the queue
/// doesn't need to know the orchestrator's type — it only needs something
/// that turns a `LaunchRequest` into a running `AgentId`.
pub type LaunchFn = Arc<
    dyn Fn(LaunchRequest) -> Pin<Box<dyn Future<Output = OrchestratorResult<AgentId>> + Send>>
        + Send
        + Sync,
>;

struct Entry {
    request: LaunchRequest,
    responder: oneshot::Sender<OrchestratorResult<AgentId>>,
}

/// Single-worker FIFO queue for agent launches. Requests are admitted one
/// at a time (concurrency = 1); a cancelled request still sitting in the
/// queue is removed without ever reaching `launch`. Bounded by `capacity`
/// (SPEC_FULL.md §2.3 `launch_queue_capacity`): a `submit` call made while
/// the queue is already at capacity is rejected immediately rather than
/// growing the `VecDeque` without bound.
pub struct LaunchQueue {
    queue: Arc<Mutex<VecDeque<Entry>>>,
    notify: Arc<Notify>,
    launch: LaunchFn,
    capacity: usize,
}

impl LaunchQueue {
    pub fn new(launch: LaunchFn, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            notify: Arc::new(Notify::new()),
            launch,
            capacity,
        })
    }

    /// Enqueues `request` and waits for it to be launched (or cancelled).
    /// Rejected with `LaunchQueueFull` if the queue already holds
    /// `capacity` pending requests.
    pub async fn submit(&self, request: LaunchRequest) -> OrchestratorResult<AgentId> {
        let (tx, rx) = oneshot::channel();
        let request_id = request.id;
        {
            let mut queue = self.queue.lock().await;
            if queue.len() >= self.capacity {
                warn!(%request_id, capacity = self.capacity, "launch queue full, rejecting request");
                return Err(OrchestratorError::LaunchQueueFull(self.capacity));
            }
            queue.push_back(Entry {
                request,
                responder: tx,
            });
            info!(%request_id, depth = queue.len(), "launch request enqueued");
        }
        self.notify.notify_one();

        rx.await
            .unwrap_or_else(|_| Err(OrchestratorError::LaunchCancelled(request_id.to_string())))
    }

    /// Removes a still-queued request by id. Returns `true` if it was
    /// found and removed before being launched.
    pub async fn cancel(&self, request_id: Uuid) -> bool {
        let mut queue = self.queue.lock().await;
        if let Some(pos) = queue.iter().position(|e| e.request.id == request_id) {
            let entry = queue.remove(pos).expect("position just checked");
            let _ = entry
                .responder
                .send(Err(OrchestratorError::LaunchCancelled(
                    request_id.to_string(),
                )));
            info!(%request_id, "launch request cancelled while queued");
            true
        } else {
            false
        }
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Drives the queue: pops one request at a time and runs it through
    /// `launch`, forwarding the result to whoever called `submit`. Runs
    /// until the queue is dropped.
    pub async fn run(self: Arc<Self>) {
        loop {
            let entry = {
                let mut queue = self.queue.lock().await;
                queue.pop_front()
            };

            match entry {
                Some(entry) => {
                    let result = (self.launch)(entry.request).await;
                    if let Err(ref e) = result {
                        warn!(error = %e, "launch failed");
                    }
                    let _ = entry.responder.send(result);
                }
                None => self.notify.notified().await,
            }
        }
    }
}
