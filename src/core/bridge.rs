//! Cross-boundary hand-off plumbing. A suspended turn persists its state
//! and exits the current task; one of the transports below later delivers
//! a payload that re-enters the coordinator, which re-validates the turn
//! before trusting anything else in the payload.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::core::approval::ApprovalDecision;
use crate::core::turn::TurnCoordinator;

/// What a resumption is asked to do once the staleness guard passes.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum ResumeEvent {
    /// Execute a parked background action and fold its result in.
    ActionReady { action_id: String },
    /// Run the next model cycle (deferred follow-up after tool results).
    Followup,
    /// Human decision for an approval-gated action.
    Approval {
        action_id: String,
        decision: ApprovalDecision,
    },
}

/// Exactly the state needed to resume a turn safely. Business data
/// (arguments, results) deliberately stays out: the receiving side loads
/// it from the store after the turn is confirmed current.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HandoffPayload {
    pub execution_id: String,
    pub turn_id: String,
    /// Cycle count at hand-off time; informational only, the persisted
    /// execution row is authoritative.
    pub cycle_count: u32,
    /// How many ordered-queue hops this chain has taken.
    pub chain_depth: u32,
    #[serde(flatten)]
    pub event: ResumeEvent,
}

/// Two delivery profiles over one abstraction: `publish` is at-least-once
/// and unordered for maximum concurrency; `enqueue` is ordered and
/// depth-bounded for deterministic sequential execution.
#[async_trait]
pub trait DispatchTransport: Send + Sync {
    fn publish(&self, payload: HandoffPayload) -> Result<()>;

    async fn enqueue(&self, payload: HandoffPayload) -> Result<()>;
}

pub struct LocalTransport {
    publish_tx: mpsc::UnboundedSender<HandoffPayload>,
    queue_tx: mpsc::Sender<HandoffPayload>,
    max_chain_depth: u32,
}

pub struct TransportReceivers {
    publish_rx: mpsc::UnboundedReceiver<HandoffPayload>,
    queue_rx: mpsc::Receiver<HandoffPayload>,
}

impl TransportReceivers {
    pub fn try_next_published(&mut self) -> Option<HandoffPayload> {
        self.publish_rx.try_recv().ok()
    }

    pub fn try_next_queued(&mut self) -> Option<HandoffPayload> {
        self.queue_rx.try_recv().ok()
    }
}

impl LocalTransport {
    /// `queue_depth` bounds how many ordered hand-offs may be parked;
    /// `max_chain_depth` caps recursive rescheduling through the queue.
    pub fn new(queue_depth: usize, max_chain_depth: u32) -> (Arc<Self>, TransportReceivers) {
        let (publish_tx, publish_rx) = mpsc::unbounded_channel();
        let (queue_tx, queue_rx) = mpsc::channel(queue_depth.max(1));
        (
            Arc::new(Self {
                publish_tx,
                queue_tx,
                max_chain_depth,
            }),
            TransportReceivers {
                publish_rx,
                queue_rx,
            },
        )
    }
}

#[async_trait]
impl DispatchTransport for LocalTransport {
    fn publish(&self, payload: HandoffPayload) -> Result<()> {
        self.publish_tx
            .send(payload)
            .map_err(|_| anyhow!("publish channel closed"))
    }

    async fn enqueue(&self, payload: HandoffPayload) -> Result<()> {
        if payload.chain_depth >= self.max_chain_depth {
            return Err(anyhow!(
                "hand-off chain depth {} reached the configured maximum {}",
                payload.chain_depth,
                self.max_chain_depth
            ));
        }
        self.queue_tx
            .send(payload)
            .await
            .map_err(|_| anyhow!("ordered queue closed"))
    }
}

/// Drains both transport channels into the coordinator. Published
/// payloads each run on their own task; queued payloads run strictly one
/// after another on this worker.
pub fn spawn_transport_worker(
    mut receivers: TransportReceivers,
    coordinator: Arc<TurnCoordinator>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Dispatch transport worker started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Dispatch transport worker shutting down");
                    break;
                }
                payload = receivers.publish_rx.recv() => {
                    let Some(payload) = payload else { break };
                    debug!("Delivering published hand-off for turn {}", payload.turn_id);
                    let coordinator = coordinator.clone();
                    tokio::spawn(async move {
                        if let Err(e) = coordinator.resume_turn(payload).await {
                            error!("Published hand-off resumption failed: {}", e);
                        }
                    });
                }
                payload = receivers.queue_rx.recv() => {
                    let Some(payload) = payload else { break };
                    debug!("Delivering queued hand-off for turn {}", payload.turn_id);
                    if let Err(e) = coordinator.resume_turn(payload).await {
                        error!("Queued hand-off resumption failed: {}", e);
                    }
                }
            }
        }
    })
}
